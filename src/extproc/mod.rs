//! Phased external-processing protocol.
//!
//! # Data Flow
//! ```text
//! Transport (TCP JSON lines, in-process channels)
//!     → transport.rs (ProcessingStream: recv / send / fail)
//!     → processor.rs (StreamProcessor state machine)
//!     → engine (ExecutionContext per stream)
//!     → types.rs (ProcessingResponse back over the transport)
//! ```

pub mod processor;
pub mod transport;
pub mod types;

pub use processor::{StreamError, StreamProcessor};
pub use transport::{ChannelStream, Outbound, ProcessingStream, StreamPeer, TransportError};
pub use types::{Phase, ProcessingEvent, ProcessingMode, ProcessingRequest, ProcessingResponse};
