//! Per-stream execution engine.
//!
//! # Data Flow
//! ```text
//! Phase event
//!     → metadata.rs (RouteMetadata from attributes)
//!     → context.rs (ExecutionContext builds Request/ResponseContext)
//!     → executor.rs (ChainExecutor runs the bound chain)
//!     → translator.rs (ExecutionResult → PhaseResponse)
//!     → ProcessingResponse (+ dynamic metadata, mode override)
//! ```

pub mod context;
pub mod executor;
pub mod headers;
pub mod metadata;
pub mod translator;

pub use context::{Body, ExecutionContext, RequestContext, ResponseContext, SharedContext};
pub use executor::{ChainExecutor, ConditionEvaluator, ExecutionError, ExecutionResult, SequentialExecutor};
pub use headers::Headers;
pub use metadata::RouteMetadata;
pub use translator::{ActionTranslator, DefaultTranslator};
