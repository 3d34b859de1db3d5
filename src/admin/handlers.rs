use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub active_streams: u64,
}

#[derive(Debug, Serialize)]
pub struct PolicyStatus {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub execution_condition: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RouteStatus {
    pub policies: Vec<PolicyStatus>,
    pub requires_request_body: bool,
    pub requires_response_body: bool,
    pub has_execution_conditions: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes: state.routes.len(),
        active_streams: state.tracker.active_count(),
    })
}

/// Dump of the route table, keyed and sorted by route key.
pub async fn get_routes(State(state): State<AdminState>) -> Json<BTreeMap<String, RouteStatus>> {
    let routes = state
        .routes
        .snapshot()
        .into_iter()
        .map(|(key, chain)| {
            let policies = chain
                .specs()
                .iter()
                .map(|spec| PolicyStatus {
                    name: spec.name.clone(),
                    version: spec.version.clone(),
                    enabled: spec.enabled,
                    execution_condition: spec.execution_condition.clone(),
                })
                .collect();
            let status = RouteStatus {
                policies,
                requires_request_body: chain.requires_request_body(),
                requires_response_body: chain.requires_response_body(),
                has_execution_conditions: chain.has_execution_conditions(),
            };
            (key, status)
        })
        .collect();

    Json(routes)
}
