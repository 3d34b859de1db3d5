//! Route key → policy chain table.
//!
//! # Responsibilities
//! - Resolve a route key to its compiled chain
//! - Support single-entry registration and atomic whole-table replacement
//! - Hand out independent snapshots for inspection
//!
//! # Design Decisions
//! - One `RwLock` around the whole map; reads vastly outnumber writes
//! - Chains are `Arc`-shared, so a stream keeps its chain across a swap

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::policy::chain::PolicyChain;

/// Concurrent map from route key to compiled [`PolicyChain`].
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, Arc<PolicyChain>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the chain for `route_key`. `None` means no policies apply.
    pub fn get(&self, route_key: &str) -> Option<Arc<PolicyChain>> {
        self.routes
            .read()
            .expect("route table lock poisoned")
            .get(route_key)
            .cloned()
    }

    /// Insert or overwrite a single route. Last write wins.
    pub fn register(&self, route_key: impl Into<String>, chain: Arc<PolicyChain>) {
        let route_key = route_key.into();
        tracing::debug!(route_key = %route_key, policies = chain.len(), "Registering route");
        self.routes
            .write()
            .expect("route table lock poisoned")
            .insert(route_key, chain);
    }

    /// Remove a single route, returning its chain if it existed.
    pub fn unregister(&self, route_key: &str) -> Option<Arc<PolicyChain>> {
        self.routes
            .write()
            .expect("route table lock poisoned")
            .remove(route_key)
    }

    /// Swap in a complete new table. Readers see either the old or the new
    /// set, never a mix.
    pub fn replace_all(&self, routes: HashMap<String, Arc<PolicyChain>>) {
        let mut guard = self.routes.write().expect("route table lock poisoned");
        *guard = routes;
    }

    /// An independent copy of the current table.
    pub fn snapshot(&self) -> HashMap<String, Arc<PolicyChain>> {
        self.routes.read().expect("route table lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.routes.read().expect("route table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable").field("routes", &self.len()).finish()
    }
}
