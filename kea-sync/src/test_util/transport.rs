use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::lock;
use crate::kea::document::same_network;
use crate::kea::error::{KeaError, Result};
use crate::kea::{Dhcp4Config, Transport};

#[derive(Default)]
struct ServerState {
    config: Dhcp4Config,
    calls: Vec<&'static str>,
    applied: Vec<Dhcp4Config>,
    rejected_subnets: Vec<String>,
    rejected_addresses: Vec<String>,
    reject_apply: bool,
    unreachable: bool,
}

/// DHCP server stand-in recording every command it receives.
///
/// Validation and apply reject any document holding one of the subnets or
/// reservation addresses registered with [`reject_subnet`](Self::reject_subnet)
/// and [`reject_address`](Self::reject_address).
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryTransport {
    pub fn new(config: Dhcp4Config) -> Self {
        let transport = Self::default();
        lock(&transport.state).config = config;
        transport
    }

    pub fn reject_subnet(&self, subnet: &str) {
        lock(&self.state).rejected_subnets.push(subnet.to_string());
    }

    /// Reject documents holding a reservation for this address.
    pub fn reject_address(&self, ip: &str) {
        lock(&self.state).rejected_addresses.push(ip.to_string());
    }

    /// Refuse every `config-set`.
    pub fn reject_apply(&self, reject: bool) {
        lock(&self.state).reject_apply = reject;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    /// Running configuration of the server.
    pub fn server_config(&self) -> Dhcp4Config {
        lock(&self.state).config.clone()
    }

    /// Command names received so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.state).calls.clone()
    }

    /// Every document received by `config-set`.
    pub fn applied(&self) -> Vec<Dhcp4Config> {
        lock(&self.state).applied.clone()
    }

    fn check(&self, command: &'static str, config: Option<&Dhcp4Config>) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(command);
        if state.unreachable {
            return Err(KeaError::Transport("connection refused".to_string()));
        }
        if command == "config-set" && state.reject_apply {
            return Err(KeaError::Rejected {
                command: command.to_string(),
                text: "configuration refused".to_string(),
            });
        }
        let Some(config) = config else {
            return Ok(());
        };
        for subnet in &config.subnet4 {
            if state
                .rejected_subnets
                .iter()
                .any(|r| same_network(r, &subnet.subnet))
            {
                return Err(KeaError::Rejected {
                    command: command.to_string(),
                    text: format!("subnet {} refused", subnet.subnet),
                });
            }
            for resa in &subnet.reservations {
                let ip = resa.ip_address.as_deref().unwrap_or_default();
                if state.rejected_addresses.iter().any(|r| r == ip) {
                    return Err(KeaError::Rejected {
                        command: command.to_string(),
                        text: format!("reservation {} refused", ip),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_config(&self) -> Result<Dhcp4Config> {
        self.check("config-get", None)?;
        Ok(self.server_config())
    }

    async fn validate_config(&self, config: &Dhcp4Config) -> Result<()> {
        self.check("config-test", Some(config))
    }

    async fn apply_config(&self, config: &Dhcp4Config) -> Result<()> {
        self.check("config-set", Some(config))?;
        let mut state = lock(&self.state);
        state.config = config.clone();
        state.applied.push(config.clone());
        Ok(())
    }

    async fn persist_config(&self) -> Result<()> {
        self.check("config-write", None)
    }
}
