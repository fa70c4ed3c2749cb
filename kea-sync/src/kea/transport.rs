//! DHCP server transports.
//!
//! A transport exposes the four primitives the staging store needs: fetch the
//! running configuration, validate a candidate, apply it, persist it.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::document::Dhcp4Config;
use super::error::{KeaError, Result};
use super::http::HttpTransport;

/// Connection to a DHCPv4 server configuration.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the running configuration.
    async fn get_config(&self) -> Result<Dhcp4Config>;

    /// Check a configuration without applying it.
    async fn validate_config(&self, config: &Dhcp4Config) -> Result<()>;

    /// Replace the running configuration.
    async fn apply_config(&self, config: &Dhcp4Config) -> Result<()>;

    /// Write the running configuration to permanent storage.
    async fn persist_config(&self) -> Result<()>;
}

/// Open a transport for a `http(s)://` or `file://` URL.
pub async fn connect(url: &str) -> Result<Box<dyn Transport>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        info!("Kea control agent at {}", url);
        Ok(Box::new(HttpTransport::new(url)?))
    } else if let Some(path) = url.strip_prefix("file://") {
        info!("Kea configuration file {}", path);
        Ok(Box::new(FileTransport::open(path).await?))
    } else {
        Err(KeaError::InvalidUrl(url.to_string()))
    }
}

/// Stand-in for a server: configuration held in memory, mirrored to a file.
///
/// Validation only checks that the document serializes.
pub struct FileTransport {
    path: Option<PathBuf>,
    config: Mutex<Dhcp4Config>,
}

impl FileTransport {
    /// Load the file if it exists. Both a bare document and one wrapped in
    /// `{"Dhcp4": ...}` are accepted.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut value: Value = serde_json::from_slice(&bytes)?;
                if let Some(inner) = value.get_mut("Dhcp4").map(Value::take) {
                    value = inner;
                }
                serde_json::from_value(value)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist, start empty", path.display());
                Dhcp4Config::default()
            }
            Err(source) => return Err(KeaError::Io { path, source }),
        };

        Ok(Self {
            path: Some(path),
            config: Mutex::new(config),
        })
    }

    /// Memory-only transport, nothing is written on persist.
    pub fn in_memory(config: Dhcp4Config) -> Self {
        Self {
            path: None,
            config: Mutex::new(config),
        }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn get_config(&self) -> Result<Dhcp4Config> {
        Ok(self.config.lock().await.clone())
    }

    async fn validate_config(&self, config: &Dhcp4Config) -> Result<()> {
        serde_json::to_vec(config)?;
        Ok(())
    }

    async fn apply_config(&self, config: &Dhcp4Config) -> Result<()> {
        self.validate_config(config).await?;
        *self.config.lock().await = config.clone();
        Ok(())
    }

    async fn persist_config(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = self.config.lock().await.clone();
        let body = serde_json::to_vec_pretty(&json!({ "Dhcp4": config }))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|source| KeaError::Io {
                path: path.clone(),
                source,
            })
    }
}
