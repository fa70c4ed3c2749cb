//! Shared test utilities for kea-sync integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::Router;
use kea_sync::item::ItemMaps;
use kea_sync::kea::SubnetCorrelation;
use kea_sync::test_util::{MemoryIpam, MemoryTransport};
use kea_sync::{Reconciler, StagingStore};
use reqwest::{Client, Response as ReqwestResponse};
use serde::Serialize;
use tokio::net::TcpListener;

/// Reconciler over an in-memory inventory and server, with default mappings.
pub fn reconciler(ipam: &MemoryIpam, server: &MemoryTransport) -> Reconciler {
    build(ipam, server, SubnetCorrelation::SubnetId, false)
}

/// Same as [`reconciler`], in check mode.
pub fn checking_reconciler(ipam: &MemoryIpam, server: &MemoryTransport) -> Reconciler {
    build(ipam, server, SubnetCorrelation::SubnetId, true)
}

pub fn build(
    ipam: &MemoryIpam,
    server: &MemoryTransport,
    correlation: SubnetCorrelation,
    check: bool,
) -> Reconciler {
    let store = StagingStore::new(Box::new(server.clone()), correlation);
    Reconciler::new(Box::new(ipam.clone()), store, ItemMaps::default(), check)
}

/// An axum router served on an OS-assigned local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            client: Client::new(),
            shutdown_tx,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn get(&self, path: &str) -> ReqwestResponse {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// POST a raw body with extra headers.
    pub async fn post_raw(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &'static str,
    ) -> ReqwestResponse {
        let mut request = self.client.post(format!("{}{}", self.base_url(), path));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.body(body).send().await.expect("Request failed")
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}
