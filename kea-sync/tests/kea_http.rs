//! Control agent transport against a mock agent.

mod common;

use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use common::TestServer;
use kea_sync::kea::http::HttpTransport;
use kea_sync::kea::{Dhcp4Config, KeaError, SubnetItem, Transport};
use serde_json::{Value, json};

struct MockAgent {
    status: StatusCode,
    reply: Value,
    requests: Mutex<Vec<Value>>,
}

async fn command(
    State(agent): State<Arc<MockAgent>>,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    agent.requests.lock().unwrap().push(request);
    (agent.status, Json(agent.reply.clone()))
}

async fn spawn(status: StatusCode, reply: Value) -> (TestServer, Arc<MockAgent>, HttpTransport) {
    let agent = Arc::new(MockAgent {
        status,
        reply,
        requests: Mutex::new(Vec::new()),
    });
    let router = Router::new()
        .route("/", post(command))
        .with_state(agent.clone());
    let server = TestServer::spawn(router).await;
    let transport = HttpTransport::new(&format!("{}/", server.base_url())).unwrap();
    (server, agent, transport)
}

#[tokio::test]
async fn test_config_get() {
    let (server, agent, transport) = spawn(
        StatusCode::OK,
        json!([{
            "result": 0,
            "arguments": {
                "Dhcp4": {
                    "subnet4": [{"id": 1, "subnet": "10.0.0.0/24", "valid-lifetime": 600}],
                    "ip-reservations-unique": false,
                    "interfaces-config": {"interfaces": ["eth0"]},
                },
                "hash": "abc",
            },
        }]),
    )
    .await;

    let config = transport.get_config().await.unwrap();
    assert_eq!(config.subnet4.len(), 1);
    assert_eq!(config.subnet4[0].id, Some(1));
    assert!(!config.ip_uniqueness());
    assert!(config.extra.contains_key("interfaces-config"));

    let requests = agent.requests.lock().unwrap();
    assert_eq!(
        requests[0],
        json!({"command": "config-get", "service": ["dhcp4"]})
    );
    server.shutdown();
}

#[tokio::test]
async fn test_config_set_wraps_document() {
    let (server, agent, transport) =
        spawn(StatusCode::OK, json!([{"result": 0, "text": "done"}])).await;

    let mut config = Dhcp4Config::default();
    let mut subnet = SubnetItem::new("10.0.0.0/24");
    subnet.id = Some(3);
    config.subnet4.push(subnet);
    transport.apply_config(&config).await.unwrap();
    transport.persist_config().await.unwrap();

    let requests = agent.requests.lock().unwrap();
    assert_eq!(requests[0]["command"], "config-set");
    assert_eq!(
        requests[0]["arguments"]["Dhcp4"]["subnet4"][0]["subnet"],
        "10.0.0.0/24"
    );
    assert_eq!(requests[1]["command"], "config-write");
    assert!(requests[1].get("arguments").is_none());
    server.shutdown();
}

#[tokio::test]
async fn test_rejection() {
    let (server, _agent, transport) = spawn(
        StatusCode::OK,
        json!([{"result": 1, "text": "subnet overlaps"}]),
    )
    .await;

    let err = transport
        .validate_config(&Dhcp4Config::default())
        .await
        .unwrap_err();
    match err {
        KeaError::Rejected { command, text } => {
            assert_eq!(command, "config-test");
            assert_eq!(text, "subnet overlaps");
        }
        other => panic!("unexpected error: {}", other),
    }
    server.shutdown();
}

#[tokio::test]
async fn test_transport_errors() {
    // HTTP failure
    let (server, _agent, transport) =
        spawn(StatusCode::INTERNAL_SERVER_ERROR, json!({})).await;
    assert!(transport.get_config().await.unwrap_err().is_transport());
    server.shutdown();

    // More than one reply
    let (server, _agent, transport) =
        spawn(StatusCode::OK, json!([{"result": 0}, {"result": 0}])).await;
    assert!(transport.persist_config().await.unwrap_err().is_transport());
    server.shutdown();

    // No Dhcp4 document in the reply
    let (server, _agent, transport) =
        spawn(StatusCode::OK, json!([{"result": 0, "arguments": {}}])).await;
    assert!(transport.get_config().await.unwrap_err().is_transport());
    server.shutdown();
}
