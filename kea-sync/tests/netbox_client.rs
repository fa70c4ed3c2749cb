//! NetBox client against a mock REST API.

mod common;

use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    routing::get,
};
use common::TestServer;
use kea_sync::ipam::netbox::Filter;
use kea_sync::ipam::{AddressFilter, IpamError, IpamSource, NetboxClient};
use serde_json::{Value, json};

const TOKEN: &str = "0123456789abcdef";

#[derive(Debug, Clone)]
struct Seen {
    path: String,
    query: Vec<(String, String)>,
    auth: Option<String>,
}

impl Seen {
    fn has(&self, key: &str, value: &str) -> bool {
        self.query.iter().any(|(k, v)| k == key && v == value)
    }
}

#[derive(Default)]
struct MockNetbox {
    seen: Mutex<Vec<Seen>>,
}

impl MockNetbox {
    fn record(&self, path: String, query: Vec<(String, String)>, headers: &HeaderMap) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push(Seen { path, query, auth });
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn list(
    State(mock): State<Arc<MockNetbox>>,
    Path(endpoint): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Json<Value> {
    let host = host(&headers);
    let second_page = query.iter().any(|(k, v)| k == "page" && v == "2");
    mock.record(format!("/api/ipam/{}/", endpoint), query, &headers);

    let body = match endpoint.as_str() {
        "prefixes" if !second_page => json!({
            "count": 2,
            "next": format!("http://{}/api/ipam/prefixes/?page=2&status=active", host),
            "results": [{"id": 1, "prefix": "10.0.0.0/24", "status": {"value": "active"}}],
        }),
        "prefixes" => json!({
            "count": 2,
            "next": null,
            "results": [{"id": 2, "prefix": "10.0.1.0/24", "status": {"value": "active"}}],
        }),
        "ip-ranges" => json!({
            "count": 2,
            "next": null,
            "results": [
                {"id": 10, "start_address": "10.0.0.100/24", "end_address": "10.0.0.199/24"},
                {"id": 11, "start_address": "10.0.0.200/23", "end_address": "10.0.1.10/23"},
            ],
        }),
        "ip-addresses" => json!({
            "count": 3,
            "next": null,
            "results": [
                {
                    "id": 20,
                    "address": "10.0.0.20/24",
                    "dns_name": "web.lan",
                    "assigned_object_type": "dcim.interface",
                    "assigned_object_id": 5,
                    "assigned_object": {
                        "id": 5,
                        "url": format!("http://{}/api/dcim/interfaces/5/", host),
                        "name": "eth0",
                    },
                },
                {
                    "id": 21,
                    "address": "10.0.0.21/24",
                    "assigned_object_type": "dcim.interface",
                    "assigned_object_id": 6,
                    "assigned_object": {
                        "id": 6,
                        "url": format!("http://{}/api/dcim/interfaces/6/", host),
                        "name": "eth1",
                    },
                },
                {"id": 22, "address": "10.0.0.22/24", "assigned_object": null},
            ],
        }),
        _ => json!({"count": 0, "next": null, "results": []}),
    };
    Json(body)
}

async fn interface(
    State(mock): State<Arc<MockNetbox>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Json<Value> {
    mock.record(format!("/api/dcim/interfaces/{}/", id), Vec::new(), &headers);
    let mac = if id == 5 {
        json!("AA:BB:CC:DD:EE:05")
    } else {
        Value::Null
    };
    Json(json!({
        "id": id,
        "name": "eth0",
        "mac_address": mac,
        "device": {"id": 7, "name": "web"},
    }))
}

async fn spawn() -> (TestServer, Arc<MockNetbox>) {
    let mock = Arc::new(MockNetbox::default());
    let router = Router::new()
        .route("/api/ipam/{endpoint}/", get(list))
        .route("/api/dcim/interfaces/{id}/", get(interface))
        .with_state(mock.clone());
    (TestServer::spawn(router).await, mock)
}

fn filter(value: Value) -> Filter {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_pagination_and_token() {
    let (server, mock) = spawn().await;
    let client = NetboxClient::new(&format!("{}/", server.base_url()), Some(TOKEN.to_string()))
        .unwrap()
        .with_filters(
            filter(json!({"status": "active"})),
            Filter::new(),
            Filter::new(),
        );

    let prefixes = client.all_prefixes().await.unwrap();
    let ids: Vec<u64> = prefixes.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(prefixes[0].fields["status"]["value"], "active");

    let seen = mock.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].has("status", "active"));
    assert!(seen[1].has("page", "2"));
    let expected = format!("Token {}", TOKEN);
    assert!(seen.iter().all(|s| s.auth.as_deref() == Some(expected.as_str())));

    server.shutdown();
}

#[tokio::test]
async fn test_lookup_by_id_and_containment() {
    let (server, mock) = spawn().await;
    let client = NetboxClient::new(&server.base_url(), None).unwrap();

    let prefix = client.prefix(1).await.unwrap().unwrap();
    assert_eq!(prefix.prefix, "10.0.0.0/24");
    assert!(mock.seen()[0].has("id", "1"));
    assert!(mock.seen()[0].auth.is_none());

    client.prefixes_containing("10.0.0.5").await.unwrap();
    assert!(mock.seen().iter().any(|s| s.has("contains", "10.0.0.5")));

    // The second range reaches into the next network
    let ranges = client.ip_ranges_in("10.0.0.0/24").await.unwrap();
    assert_eq!(ranges.iter().map(|r| r.id).collect::<Vec<_>>(), vec![10]);
    let last = mock.seen().pop().unwrap();
    assert_eq!(last.path, "/api/ipam/ip-ranges/");
    assert!(last.has("parent", "10.0.0.0/24"));

    server.shutdown();
}

#[tokio::test]
async fn test_addresses_expand_interface() {
    let (server, mock) = spawn().await;
    let client = NetboxClient::new(&server.base_url(), Some(TOKEN.to_string()))
        .unwrap()
        .with_filters(
            Filter::new(),
            Filter::new(),
            filter(json!({"status": "dhcp", "tag": ["pxe", "lab"]})),
        );

    let addresses = client
        .ip_addresses(&AddressFilter::Interface(5))
        .await
        .unwrap();
    assert_eq!(addresses.len(), 1);
    let address = &addresses[0];
    assert_eq!(address.id, 20);
    assert_eq!(address.fields["assigned_object"]["mac_address"], "AA:BB:CC:DD:EE:05");
    assert_eq!(address.fields["assigned_object"]["device"]["id"], 7);

    let seen = mock.seen();
    let query = &seen[0];
    assert_eq!(query.path, "/api/ipam/ip-addresses/");
    assert!(query.has("assigned_to_interface", "true"));
    assert!(query.has("interface_id", "5"));
    assert!(query.has("status", "dhcp"));
    assert!(query.has("tag", "pxe") && query.has("tag", "lab"));
    // Only addresses with an interface link are expanded
    let expanded: Vec<&str> = seen[1..].iter().map(|s| s.path.as_str()).collect();
    assert_eq!(
        expanded,
        vec!["/api/dcim/interfaces/5/", "/api/dcim/interfaces/6/"]
    );

    server.shutdown();
}

#[tokio::test]
async fn test_error_status() {
    let (server, _mock) = spawn().await;
    let client = NetboxClient::new(&format!("{}/nowhere", server.base_url()), None).unwrap();

    match client.all_prefixes().await.unwrap_err() {
        IpamError::Status { status, url } => {
            assert_eq!(status, 404);
            assert!(url.contains("/nowhere/api/ipam/prefixes/"));
        }
        other => panic!("unexpected error: {}", other),
    }

    server.shutdown();
}
