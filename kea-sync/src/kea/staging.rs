//! Staged editing of the DHCPv4 configuration.
//!
//! The store owns two independent snapshots of the server document. Every
//! mutation edits the working snapshot; [`StagingStore::commit`] has the
//! server validate it and promotes it to the committed snapshot, or restores
//! the working snapshot from the committed one. [`StagingStore::push`] sends
//! the committed snapshot to the server and re-pulls its canonical form.
//!
//! Structural conflicts are detected locally, before any round-trip, and
//! leave the working snapshot untouched.

use serde_json::Value;
use tracing::{debug, error, info};

use super::document::{
    Dhcp4Config, IP_ADDRESS_ID, IP_RANGE_ID, PoolItem, ReservationItem, SubnetCorrelation,
    SubnetItem, ranges_overlap, same_network,
};
use super::error::{KeaError, Result};
use super::transport::Transport;

/// Whether a mutation is followed by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit after the change.
    Always,
    /// Leave the change staged.
    Never,
    /// Follow the store's `auto_commit` flag.
    #[default]
    Auto,
}

pub struct StagingStore {
    transport: Box<dyn Transport>,
    correlation: SubnetCorrelation,
    working: Dhcp4Config,
    committed: Dhcp4Config,
    pending_push: bool,
    ip_uniqueness: bool,
    /// Commit after every `CommitMode::Auto` mutation.
    pub auto_commit: bool,
}

impl StagingStore {
    pub fn new(transport: Box<dyn Transport>, correlation: SubnetCorrelation) -> Self {
        Self {
            transport,
            correlation,
            working: Dhcp4Config::default(),
            committed: Dhcp4Config::default(),
            pending_push: false,
            ip_uniqueness: true,
            auto_commit: true,
        }
    }

    pub fn working(&self) -> &Dhcp4Config {
        &self.working
    }

    pub fn committed(&self) -> &Dhcp4Config {
        &self.committed
    }

    /// Working snapshot holds changes not yet committed.
    pub fn is_dirty(&self) -> bool {
        self.working != self.committed
    }

    pub fn has_pending_push(&self) -> bool {
        self.pending_push
    }

    pub fn ip_uniqueness(&self) -> bool {
        self.ip_uniqueness
    }

    /// Replace both snapshots with the server's running configuration.
    pub async fn pull(&mut self) -> Result<()> {
        let config = self.transport.get_config().await?;
        self.ip_uniqueness = config.ip_uniqueness();
        debug!(
            "pulled {} subnet(s), ip-reservations-unique={}",
            config.subnet4.len(),
            self.ip_uniqueness
        );
        self.working = config.clone();
        self.committed = config;
        self.pending_push = false;
        Ok(())
    }

    /// Have the server validate the working snapshot and promote it.
    ///
    /// On failure the working snapshot is restored from the committed one.
    pub async fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.transport.validate_config(&self.working).await {
            self.working = self.committed.clone();
            return Err(e);
        }
        self.committed = self.working.clone();
        self.pending_push = true;
        debug!("working configuration committed");
        Ok(())
    }

    /// Drop changes staged since the last commit.
    pub fn rollback(&mut self) {
        if self.is_dirty() {
            debug!("discarding uncommitted changes");
        }
        self.working = self.committed.clone();
    }

    /// Apply and persist the committed snapshot, then re-pull.
    ///
    /// A rejection is logged and leaves the push pending; transport failures
    /// are returned.
    pub async fn push(&mut self) -> Result<()> {
        if !self.pending_push {
            debug!("no committed change to push");
            return Ok(());
        }

        let outcome = match self.transport.apply_config(&self.committed).await {
            Ok(()) => self.transport.persist_config().await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_rejection() => {
                error!("push failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.pending_push = false;
        info!("configuration pushed to DHCP server");
        self.pull().await
    }

    async fn finish(&mut self, mode: CommitMode) -> Result<()> {
        let commit = match mode {
            CommitMode::Always => true,
            CommitMode::Never => false,
            CommitMode::Auto => self.auto_commit,
        };
        if commit { self.commit().await } else { Ok(()) }
    }

    /// Create or wholesale replace the subnet bound to `prefix_id`.
    pub async fn set_subnet(
        &mut self,
        prefix_id: u64,
        subnet: SubnetItem,
        mode: CommitMode,
    ) -> Result<()> {
        self.stage_subnet(prefix_id, subnet, false)?;
        self.finish(mode).await
    }

    /// Replace the options of an existing subnet, keeping its pools and
    /// reservations. Fails with `SubnetNotFound` or `SubnetMismatch` when a
    /// full [`set_subnet`](Self::set_subnet) is needed instead.
    pub async fn update_subnet(
        &mut self,
        prefix_id: u64,
        subnet: SubnetItem,
        mode: CommitMode,
    ) -> Result<()> {
        self.stage_subnet(prefix_id, subnet, true)?;
        self.finish(mode).await
    }

    pub async fn del_subnet(&mut self, prefix_id: u64, mode: CommitMode) -> Result<()> {
        let correlation = self.correlation;
        let before = self.working.subnet4.len();
        self.working
            .subnet4
            .retain(|s| correlation.prefix_id(s) != Some(prefix_id));
        if self.working.subnet4.len() != before {
            info!("subnet for prefix {} deleted", prefix_id);
        }
        self.finish(mode).await
    }

    pub async fn del_all_subnets(&mut self, mode: CommitMode) -> Result<()> {
        self.working.subnet4.clear();
        self.finish(mode).await
    }

    /// Create or replace the pool bound to `range_id` in the subnet of
    /// `prefix_id`.
    pub async fn set_pool(
        &mut self,
        prefix_id: u64,
        range_id: u64,
        mut pool: PoolItem,
        mode: CommitMode,
    ) -> Result<()> {
        let bounds = pool.bounds()?;
        pool.user_context
            .insert(IP_RANGE_ID.to_string(), Value::from(range_id));
        let requested = pool.pool.clone();

        let subnet = self.subnet_mut(prefix_id)?;
        replace_or_append(
            &mut subnet.pools,
            pool,
            |p| p.range_id() == Some(range_id),
            |p| {
                // Unparseable siblings cannot be compared
                let other = p.bounds().ok()?;
                ranges_overlap(bounds, other)
                    .then(|| format!("pool {} overlaps {}", requested, p.pool))
            },
        )?;
        info!(
            "pool {} (range {}) staged in subnet of prefix {}",
            requested, range_id, prefix_id
        );
        self.finish(mode).await
    }

    pub async fn del_pool(&mut self, range_id: u64, mode: CommitMode) -> Result<()> {
        for subnet in &mut self.working.subnet4 {
            let before = subnet.pools.len();
            subnet.pools.retain(|p| p.range_id() != Some(range_id));
            if subnet.pools.len() != before {
                info!("pool for range {} deleted from {}", range_id, subnet.subnet);
            }
        }
        self.finish(mode).await
    }

    /// Create or replace the reservation bound to `ipaddr_id` in the subnet
    /// of `prefix_id`.
    pub async fn set_reservation(
        &mut self,
        prefix_id: u64,
        ipaddr_id: u64,
        mut resa: ReservationItem,
        mode: CommitMode,
    ) -> Result<()> {
        let ip = required(&resa.ip_address, "ip-address")?;
        let hw = required(&resa.hw_address, "hw-address")?;
        resa.user_context
            .insert(IP_ADDRESS_ID.to_string(), Value::from(ipaddr_id));
        let unique_ip = self.ip_uniqueness;

        let subnet = self.subnet_mut(prefix_id)?;
        replace_or_append(
            &mut subnet.reservations,
            resa,
            |r| r.ipaddr_id() == Some(ipaddr_id),
            |r| {
                if r.hw_address
                    .as_deref()
                    .is_some_and(|other| other.trim().eq_ignore_ascii_case(&hw))
                {
                    return Some(format!("hw-address {}", hw));
                }
                if unique_ip && r.ip_address.as_deref().map(str::trim) == Some(ip.as_str()) {
                    return Some(format!("ip-address {}", ip));
                }
                None
            },
        )?;
        info!(
            "reservation {} ({}) staged in subnet of prefix {}",
            ip, hw, prefix_id
        );
        self.finish(mode).await
    }

    pub async fn del_resa(&mut self, ipaddr_id: u64, mode: CommitMode) -> Result<()> {
        for subnet in &mut self.working.subnet4 {
            let before = subnet.reservations.len();
            subnet
                .reservations
                .retain(|r| r.ipaddr_id() != Some(ipaddr_id));
            if subnet.reservations.len() != before {
                info!(
                    "reservation for IP address {} deleted from {}",
                    ipaddr_id, subnet.subnet
                );
            }
        }
        self.finish(mode).await
    }

    fn stage_subnet(
        &mut self,
        prefix_id: u64,
        mut subnet: SubnetItem,
        preserve_children: bool,
    ) -> Result<()> {
        if subnet.subnet.trim().is_empty() {
            return Err(KeaError::MissingKey {
                item: "subnet",
                key: "subnet",
            });
        }

        let correlation = self.correlation;
        let mut target = None;
        for (i, current) in self.working.subnet4.iter().enumerate() {
            if correlation.prefix_id(current) == Some(prefix_id) {
                if preserve_children && !same_network(&current.subnet, &subnet.subnet) {
                    return Err(KeaError::SubnetMismatch {
                        current: current.subnet.clone(),
                        requested: subnet.subnet.clone(),
                    });
                }
                target.get_or_insert(i);
            } else if same_network(&current.subnet, &subnet.subnet) {
                return Err(KeaError::DuplicateValue(format!("subnet {}", subnet.subnet)));
            }
        }

        correlation.bind(&mut subnet, prefix_id);
        match target {
            Some(i) => {
                let current = &mut self.working.subnet4[i];
                if preserve_children {
                    subnet.pools = std::mem::take(&mut current.pools);
                    subnet.reservations = std::mem::take(&mut current.reservations);
                    if subnet.id.is_none() {
                        subnet.id = current.id;
                    }
                }
                *current = subnet;
                info!(
                    "subnet {} (prefix {}) {}",
                    current.subnet,
                    prefix_id,
                    if preserve_children { "updated" } else { "replaced" }
                );
            }
            None if preserve_children => return Err(KeaError::SubnetNotFound(prefix_id)),
            None => {
                info!("subnet {} (prefix {}) added", subnet.subnet, prefix_id);
                self.working.subnet4.push(subnet);
            }
        }
        Ok(())
    }

    fn subnet_mut(&mut self, prefix_id: u64) -> Result<&mut SubnetItem> {
        let correlation = self.correlation;
        self.working
            .subnet4
            .iter_mut()
            .find(|s| correlation.prefix_id(s) == Some(prefix_id))
            .ok_or(KeaError::SubnetNotFound(prefix_id))
    }
}

fn required(value: &Option<String>, key: &'static str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(KeaError::MissingKey {
            item: "reservation",
            key,
        })
}

/// Replace the item matching `is_target`, or append. Every other sibling is
/// checked for a conflict, even once the target has been found.
fn replace_or_append<T>(
    items: &mut Vec<T>,
    item: T,
    is_target: impl Fn(&T) -> bool,
    conflict: impl Fn(&T) -> Option<String>,
) -> Result<()> {
    let mut target = None;
    for (i, current) in items.iter().enumerate() {
        if is_target(current) {
            target.get_or_insert(i);
        } else if let Some(what) = conflict(current) {
            return Err(KeaError::DuplicateValue(what));
        }
    }
    match target {
        Some(i) => items[i] = item,
        None => items.push(item),
    }
    Ok(())
}
