//! Webhook listener tests over a real HTTP server.

mod common;

use std::sync::Arc;

use common::{TestServer, reconciler};
use kea_sync::rest::{AppState, create_router};
use kea_sync::test_util::{MemoryIpam, MemoryTransport};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::Mutex;

const SECRET_HEADER: &str = "X-netbox2kea-secret";

fn inventory() -> MemoryIpam {
    let ipam = MemoryIpam::new();
    ipam.prefix(1, "10.0.0.0/24")
        .interface_address(5, "10.0.0.5/24", 3, 4, Some("aa:bb:cc:dd:ee:05"));
    ipam
}

async fn spawn(ipam: &MemoryIpam, server: &MemoryTransport, secret: Option<&str>) -> TestServer {
    let state = Arc::new(AppState {
        reconciler: Mutex::new(reconciler(ipam, server)),
        secret: secret.map(str::to_string),
        secret_header: SECRET_HEADER.to_string(),
    });
    TestServer::spawn(create_router(state)).await
}

fn event(model: &str, id: u64) -> Value {
    json!({
        "event": "updated",
        "model": model,
        "username": "admin",
        "data": {"id": id, "display": "whatever"},
    })
}

#[tokio::test]
async fn test_health() {
    let server = spawn(&inventory(), &MemoryTransport::default(), None).await;

    let response = server.get("/health/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");

    server.shutdown();
}

#[tokio::test]
async fn test_event_syncs_and_pushes() {
    let ipam = inventory();
    let dhcp = MemoryTransport::default();
    let server = spawn(&ipam, &dhcp, None).await;

    let response = server.post_json("/event/prefix/", &event("prefix", 1)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let config = dhcp.server_config();
    assert_eq!(config.subnet4.len(), 1);
    assert_eq!(config.subnet4[0].id, Some(1));
    assert_eq!(config.subnet4[0].reservations.len(), 1);

    // Events for deleted objects remove them
    ipam.remove_address(5);
    let response = server
        .post_json("/event/ipaddress/", &event("ipaddress", 5))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(dhcp.server_config().subnet4[0].reservations.is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_secret_header() {
    let dhcp = MemoryTransport::default();
    let server = spawn(&inventory(), &dhcp, Some("s3cret")).await;
    let body = r#"{"model": "prefix", "event": "created", "data": {"id": 1}}"#;

    let response = server.post_raw("/event/x/", &[], body).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server
        .post_raw("/event/x/", &[(SECRET_HEADER, "wrong")], body)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(dhcp.calls().is_empty());

    let response = server
        .post_raw("/event/x/", &[(SECRET_HEADER, "s3cret")], body)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    server.shutdown();
}

#[tokio::test]
async fn test_bad_requests() {
    let dhcp = MemoryTransport::default();
    let server = spawn(&inventory(), &dhcp, None).await;

    for body in [
        "not json",
        r#"{"model": "prefix", "event": "created"}"#,
        r#"{"model": "prefix", "data": {"id": 1}}"#,
        r#"{"model": "vlan", "event": "created", "data": {"id": 1}}"#,
    ] {
        let response = server.post_raw("/event/x/", &[], body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["code"], json!(400));
        assert!(error["error"].is_string());
    }
    assert!(dhcp.calls().is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_unreachable_dhcp_server() {
    let dhcp = MemoryTransport::default();
    dhcp.set_unreachable(true);
    let server = spawn(&inventory(), &dhcp, None).await;

    let response = server.post_json("/event/prefix/", &event("prefix", 1)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    server.shutdown();
}
