//! Admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: version, route count, open streams
//! - `GET /admin/routes`: snapshot of the route table
//!
//! Every endpoint requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::{get_routes, get_status};
use crate::lifecycle::Shutdown;
use crate::net::connection::StreamTracker;
use crate::routing::RouteTable;

#[derive(Clone)]
pub struct AdminState {
    pub routes: Arc<RouteTable>,
    pub tracker: StreamTracker,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(routes: Arc<RouteTable>, tracker: StreamTracker, api_key: &str) -> Self {
        Self {
            routes,
            tracker,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve_admin(listener: TcpListener, state: AdminState, shutdown: &Shutdown) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    let mut stop = shutdown.subscribe();
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = stop.recv().await;
        })
        .await
}
