//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request headers event (route name from attributes)
//!     → table.rs (RouteTable::get)
//!     → Return: Arc<PolicyChain> or None (no policies on this route)
//!
//! Config load:
//!     RouteConfig[]
//!     → validate + build every chain (no lock held)
//!     → RouteTable::replace_all (write lock held only for the swap)
//! ```
//!
//! # Design Decisions
//! - Exact route-key lookup, no pattern matching
//! - Absence is a normal outcome, not an error
//! - Readers hold the read lock only long enough to clone an `Arc`

pub mod table;

pub use table::RouteTable;
