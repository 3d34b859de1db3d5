//! Policy subsystem.
//!
//! # Data Flow
//! ```text
//! Route entry (PolicySpec[])
//!     → registry.rs (definition lookup + factory call, params merged)
//!     → chain.rs (PolicyChainBuilder, body/condition flags)
//!     → Return: immutable PolicyChain, shared by every stream on the route
//! ```
//!
//! # Design Decisions
//! - Policies are stateless and shared (`Arc<dyn Policy>`)
//! - Chain construction fails fast on the first bad spec
//! - Body requirements are computed once per chain, never per request

pub mod builtin;
pub mod chain;
pub mod registry;
pub mod types;

pub use chain::{ApiMetadata, ChainBuildError, PolicyChain, PolicyChainBuilder, PolicySpec};
pub use registry::{PolicyDefinition, PolicyMetadata, PolicyRegistry, RegistryError};
pub use types::{Action, BodyMode, HeaderMode, ImmediateReply, Modification, Params, Policy, PolicyError, PolicyMode};
