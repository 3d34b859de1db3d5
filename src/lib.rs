//! Gateway policy-execution kernel.
//!
//! Receives each proxied HTTP exchange as a phased stream of events,
//! resolves the route's policy chain, runs it and answers with wire-level
//! instructions (continue, modify, short-circuit, change buffering mode).

pub mod admin;
pub mod config;
pub mod engine;
pub mod extproc;
pub mod kernel;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod policy;
pub mod routing;
pub mod value;

pub use config::KernelConfig;
pub use kernel::{Kernel, KernelError};
pub use lifecycle::Shutdown;
