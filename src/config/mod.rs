//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every route against the registry)
//!     → ConfigLoader builds all chains off-lock
//!     → atomic RouteTable::replace_all
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → ConfigLoader::apply
//!     → failed reload keeps the active table
//! ```
//!
//! # Design Decisions
//! - Route changes always replace the whole table
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError, ConfigLoader};
pub use schema::{AdminConfig, KernelConfig, ListenerConfig, ObservabilityConfig, PolicyConfig, RouteConfig};
pub use validation::ValidationError;
