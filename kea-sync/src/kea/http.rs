//! Kea Control Agent transport.
//!
//! Commands are POSTed as `{"command", "service": ["dhcp4"], "arguments"}`
//! and answered with a one-element list of `{"result", "text", "arguments"}`.
//! A non-zero result is a rejection of the request content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::document::Dhcp4Config;
use super::error::{KeaError, Result};
use super::transport::Transport;

const SERVICE: &str = "dhcp4";

#[derive(Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    service: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct CommandResponse {
    result: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Transport talking to a Kea Control Agent over HTTP(S).
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| KeaError::Transport(format!("HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    async fn command(&self, command: &str, arguments: Option<Value>) -> Result<Option<Value>> {
        let request = CommandRequest {
            command,
            service: [SERVICE],
            arguments,
        };

        let mut replies: Vec<CommandResponse> = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| KeaError::Transport(format!("API error: {}", e)))?
            .json()
            .await
            .map_err(|e| KeaError::Transport(format!("API error: {}", e)))?;

        // One command for one service answers with exactly one reply
        if replies.len() != 1 {
            return Err(KeaError::Transport(format!(
                "command \"{}\" returned {} replies",
                command,
                replies.len()
            )));
        }
        let reply = replies.remove(0);

        if reply.result != 0 {
            return Err(KeaError::Rejected {
                command: command.to_string(),
                text: reply.text.unwrap_or_default(),
            });
        }
        debug!(
            "command \"{}\" OK (text: {})",
            command,
            reply.text.as_deref().unwrap_or("")
        );
        Ok(reply.arguments)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_config(&self) -> Result<Dhcp4Config> {
        let document = self
            .command("config-get", None)
            .await?
            .and_then(|mut args| args.get_mut("Dhcp4").map(Value::take))
            .ok_or_else(|| {
                KeaError::Transport("config-get returned no Dhcp4 document".to_string())
            })?;
        Ok(serde_json::from_value(document)?)
    }

    async fn validate_config(&self, config: &Dhcp4Config) -> Result<()> {
        self.command("config-test", Some(json!({ "Dhcp4": config })))
            .await
            .map(drop)
    }

    async fn apply_config(&self, config: &Dhcp4Config) -> Result<()> {
        self.command("config-set", Some(json!({ "Dhcp4": config })))
            .await
            .map(drop)
    }

    async fn persist_config(&self) -> Result<()> {
        self.command("config-write", None).await.map(drop)
    }
}
