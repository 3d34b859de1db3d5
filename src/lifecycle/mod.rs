//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (kernel.rs):
//!     Load config → Validate → Build route table → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Cancel open streams → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, cancel, drain
//! - Draining has a deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
