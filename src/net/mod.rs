//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (one per stream)
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (stream id, active stream count)
//!     → codec.rs (JSON-lines framing)
//!     → server.rs (spawn StreamProcessor::process)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each stream tracked for graceful shutdown
//! - Shutdown reaches open streams as a clean cancellation

pub mod codec;
pub mod connection;
pub mod listener;
pub mod server;

pub use codec::JsonLinesStream;
pub use connection::{StreamGuard, StreamId, StreamTracker};
pub use listener::{Listener, ListenerError};
pub use server::ProcessingServer;
