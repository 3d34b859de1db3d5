//! Admin API over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::net::TcpListener;

use policy_kernel::admin::{serve_admin, AdminState};
use policy_kernel::lifecycle::Shutdown;
use policy_kernel::Kernel;

mod common;

use common::{kernel, policy, route, tag_policy};

const API_KEY: &str = "test-admin-key";

async fn start_admin(kernel: &Arc<Kernel>) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let state = AdminState::new(Arc::clone(kernel.routes()), kernel.tracker().clone(), API_KEY);
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = serve_admin(listener, state, &admin_shutdown).await;
    });

    (addr, shutdown)
}

#[tokio::test]
async fn rejects_missing_or_wrong_key() {
    let kernel = kernel();
    let (addr, shutdown) = start_admin(&kernel).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("http://{}/admin/status", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("http://{}/admin/routes", addr))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    shutdown.trigger();
}

#[tokio::test]
async fn reports_status_and_routes() {
    let kernel = kernel();
    kernel
        .apply(&[
            route("orders", vec![tag_policy("x")]),
            route("upload", vec![policy("body-guard"), policy("respond")]),
        ])
        .unwrap();
    let (addr, shutdown) = start_admin(&kernel).await;
    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(format!("http://{}/admin/status", addr))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["routes"], 2);
    assert_eq!(status["active_streams"], 0);

    let routes: serde_json::Value = client
        .get(format!("http://{}/admin/routes", addr))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(routes["orders"]["policies"][0]["name"], "tag");
    assert_eq!(routes["orders"]["requires_request_body"], false);
    assert_eq!(routes["upload"]["policies"].as_array().unwrap().len(), 2);
    assert_eq!(routes["upload"]["requires_request_body"], true);

    shutdown.trigger();
}
