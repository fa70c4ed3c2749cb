//! Reconciliation of IPAM entities into the DHCP configuration.
//!
//! Each `sync_*` operation looks the entity up in IPAM: when it exists its
//! configuration item is built and staged, when it is gone the item is
//! deleted. Prefixes are handled in `prefix`, ranges in `pool` and addresses
//! in `reservation`.

mod pool;
mod prefix;
mod reservation;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ipam::{AddressFilter, IpamError, IpamSource, Prefix};
use crate::item::ItemMaps;
use crate::kea::error::Result as KeaResult;
use crate::kea::{CommitMode, KeaError, PoolItem, ReservationItem, StagingStore};

pub use prefix::Strategy;

/// Errors raised while synchronizing one entity.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Kea(#[from] KeaError),

    #[error(transparent)]
    Ipam(#[from] IpamError),

    /// An IPAM entity that cannot be turned into a configuration item.
    #[error("invalid {kind} {id}: {reason}")]
    InvalidEntity {
        kind: &'static str,
        id: u64,
        reason: String,
    },
}

impl SyncError {
    /// Errors that must stop the current operation instead of skipping one
    /// item: the DHCP server or IPAM cannot be reached.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Kea(e) => e.is_transport(),
            SyncError::Ipam(_) => true,
            SyncError::InvalidEntity { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// IPAM object kinds that can trigger a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Prefix,
    IpRange,
    IpAddress,
    Interface,
    Device,
    VmInterface,
    VirtualMachine,
}

#[derive(Debug, Error)]
#[error("unsupported target \"{0}\"")]
pub struct UnsupportedKind(pub String);

impl FromStr for EntityKind {
    type Err = UnsupportedKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "prefix" => Ok(EntityKind::Prefix),
            "iprange" => Ok(EntityKind::IpRange),
            "ipaddress" => Ok(EntityKind::IpAddress),
            "interface" => Ok(EntityKind::Interface),
            "device" => Ok(EntityKind::Device),
            "vminterface" => Ok(EntityKind::VmInterface),
            "virtualmachine" => Ok(EntityKind::VirtualMachine),
            other => Err(UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Prefix => "prefix",
            EntityKind::IpRange => "iprange",
            EntityKind::IpAddress => "ipaddress",
            EntityKind::Interface => "interface",
            EntityKind::Device => "device",
            EntityKind::VmInterface => "vminterface",
            EntityKind::VirtualMachine => "virtualmachine",
        };
        f.write_str(name)
    }
}

/// A pool or reservation waiting to be placed in its subnet(s).
enum Child {
    Pool { range_id: u64, item: PoolItem },
    Reservation { ipaddr_id: u64, item: ReservationItem },
}

impl Child {
    async fn stage(&self, kea: &mut StagingStore, prefix_id: u64) -> KeaResult<()> {
        match self {
            Child::Pool { range_id, item } => {
                kea.set_pool(prefix_id, *range_id, item.clone(), CommitMode::Auto)
                    .await
            }
            Child::Reservation { ipaddr_id, item } => {
                kea.set_reservation(prefix_id, *ipaddr_id, item.clone(), CommitMode::Auto)
                    .await
            }
        }
    }

    /// Stage the removal of this child from every subnet.
    async fn unstage(&self, kea: &mut StagingStore) -> KeaResult<()> {
        match self {
            Child::Pool { range_id, .. } => kea.del_pool(*range_id, CommitMode::Never).await,
            Child::Reservation { ipaddr_id, .. } => {
                kea.del_resa(*ipaddr_id, CommitMode::Never).await
            }
        }
    }
}

impl fmt::Display for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Pool { item, .. } => write!(f, "range {}", item.pool),
            Child::Reservation { item, .. } => {
                write!(f, "IP {}", item.ip_address.as_deref().unwrap_or("?"))
            }
        }
    }
}

/// Result of placing a child in the prefixes containing it.
#[derive(Default)]
struct Placement {
    /// Containing prefixes with no subnet yet.
    missing: Vec<Prefix>,
    /// First non-fatal failure.
    failure: Option<SyncError>,
}

impl Placement {
    fn fail(&mut self, e: SyncError) {
        match &self.failure {
            None => self.failure = Some(e),
            Some(_) => error!("{}", e),
        }
    }

    fn into_result(self) -> Result<()> {
        self.failure.map_or(Ok(()), Err)
    }
}

/// Drives IPAM-to-DHCP synchronization over one staging store.
pub struct Reconciler {
    ipam: Box<dyn IpamSource>,
    kea: StagingStore,
    maps: ItemMaps,
    check: bool,
}

impl Reconciler {
    /// In check mode nothing is ever pushed to the DHCP server.
    pub fn new(ipam: Box<dyn IpamSource>, kea: StagingStore, maps: ItemMaps, check: bool) -> Self {
        Self {
            ipam,
            kea,
            maps,
            check,
        }
    }

    pub fn kea(&self) -> &StagingStore {
        &self.kea
    }

    pub fn kea_mut(&mut self) -> &mut StagingStore {
        &mut self.kea
    }

    /// Synchronize one entity.
    pub async fn sync(&mut self, kind: EntityKind, id: u64) -> Result<()> {
        match kind {
            EntityKind::Prefix => self.sync_prefix(id).await,
            EntityKind::IpRange => self.sync_iprange(id).await,
            EntityKind::IpAddress => self.sync_ipaddress(id).await,
            EntityKind::Interface => self.sync_interface(id).await,
            EntityKind::Device => self.sync_device(id).await,
            EntityKind::VmInterface => self.sync_vminterface(id).await,
            EntityKind::VirtualMachine => self.sync_virtualmachine(id).await,
        }
    }

    pub async fn sync_interface(&mut self, id: u64) -> Result<()> {
        self.sync_assigned(AddressFilter::Interface(id)).await
    }

    pub async fn sync_device(&mut self, id: u64) -> Result<()> {
        self.sync_assigned(AddressFilter::Device(id)).await
    }

    pub async fn sync_vminterface(&mut self, id: u64) -> Result<()> {
        self.sync_assigned(AddressFilter::VmInterface(id)).await
    }

    pub async fn sync_virtualmachine(&mut self, id: u64) -> Result<()> {
        self.sync_assigned(AddressFilter::VirtualMachine(id)).await
    }

    async fn sync_assigned(&mut self, filter: AddressFilter) -> Result<()> {
        for address in self.ipam.ip_addresses(&filter).await? {
            if let Err(e) = self.sync_ipaddress(address.id).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("{} > IP {}: {}", filter, address, e);
            }
        }
        Ok(())
    }

    /// Rebuild the whole DHCP configuration from IPAM.
    ///
    /// A prefix that fails is logged and left out; it never aborts the
    /// others. Outside check mode every prefix is committed on its own, and a
    /// prefix whose commit is rejected is synced again with auto-commit on so
    /// the faulty child is rejected alone.
    pub async fn sync_all(&mut self) -> Result<()> {
        self.kea.pull().await?;
        self.kea.del_all_subnets(CommitMode::Auto).await?;

        let prefixes = self.ipam.all_prefixes().await?;
        let mut synced = 0;
        for prefix in &prefixes {
            debug!("prefix {}: generate DHCP config", prefix);
            self.kea.auto_commit = false;
            if let Err(e) = self.prefix_to_subnet(prefix, Strategy::Full).await {
                error!("prefix {}: config failed: {}", prefix, e);
                if !self.check {
                    self.kea.rollback();
                }
                continue;
            }

            // Intermediate commits would fail on subnets not created yet
            if !self.check {
                if let Err(e) = self.kea.commit().await {
                    error!("prefix {}: commit failed: {}", prefix, e);
                    warn!("prefix {}: retry with auto commit on", prefix);
                    self.kea.auto_commit = true;
                    if let Err(e) = self.prefix_to_subnet(prefix, Strategy::Full).await {
                        error!("prefix {}: config failed: {}", prefix, e);
                        self.kea.rollback();
                        continue;
                    }
                }
            }
            synced += 1;
        }
        self.kea.auto_commit = true;

        if self.check {
            match self.kea.commit().await {
                Ok(()) => info!("check mode: generated configuration is valid"),
                Err(e) => error!("check mode: generated configuration is invalid: {}", e),
            }
        }

        info!("{}/{} prefix(es) synced", synced, prefixes.len());
        if !prefixes.is_empty() && synced == 0 {
            warn!("every prefix failed, nothing to push");
            return Ok(());
        }
        self.push_to_dhcp().await
    }

    /// Push committed changes, unless in check mode.
    pub async fn push_to_dhcp(&mut self) -> Result<()> {
        if self.check {
            info!("check mode on: config will NOT be pushed to server");
            return Ok(());
        }
        Ok(self.kea.push().await?)
    }

    /// Re-pull the running configuration before processing an event.
    pub async fn reload_dhcp_config(&mut self) -> Result<()> {
        Ok(self.kea.pull().await?)
    }

    /// Stage a child in `parent`, or in every prefix containing `address`.
    async fn place(
        &mut self,
        child: &Child,
        address: &str,
        parent: Option<&Prefix>,
    ) -> Result<Placement> {
        let prefixes = match parent {
            Some(prefix) => vec![prefix.clone()],
            None => self.ipam.prefixes_containing(address).await?,
        };
        if prefixes.is_empty() {
            debug!("{}: no containing prefix", child);
        }

        let mut placement = Placement::default();
        for prefix in prefixes {
            match child.stage(&mut self.kea, prefix.id).await {
                Ok(()) => {}
                Err(KeaError::SubnetNotFound(_)) if parent.is_none() => {
                    placement.missing.push(prefix)
                }
                Err(KeaError::SubnetNotFound(_)) => {
                    error!("{}: requested subnet {} not found", child, prefix)
                }
                Err(e) if e.is_transport() => return Err(e.into()),
                Err(e) => placement.fail(e.into()),
            }
        }
        Ok(placement)
    }

    /// Move a child to the prefixes currently containing `address`.
    ///
    /// Any copy left in another subnet is removed in the same commit as the
    /// new placement. On failure the uncommitted removal is dropped too.
    async fn relocate(&mut self, child: &Child, address: &str) -> Result<()> {
        child.unstage(&mut self.kea).await?;
        let outcome = match self.place(child, address, None).await {
            Ok(placement) => self.settle(child, placement).await,
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.kea.rollback();
        } else if self.kea.auto_commit && self.kea.is_dirty() {
            // Nothing contains the new address: only the removal is staged
            self.kea.commit().await?;
        }
        outcome
    }

    /// Resync the subnets a child was missing, then place the child again.
    async fn settle(&mut self, child: &Child, mut placement: Placement) -> Result<()> {
        for prefix in std::mem::take(&mut placement.missing) {
            warn!("subnet {} is missing, sync it again", prefix);
            self.prefix_to_subnet(&prefix, Strategy::Full).await?;
            if let Some(e) = self.place(child, &prefix.prefix, Some(&prefix)).await?.failure {
                placement.fail(e);
            }
        }
        placement.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_names() {
        for name in [
            "prefix",
            "iprange",
            "ipaddress",
            "interface",
            "device",
            "vminterface",
            "virtualmachine",
        ] {
            let kind: EntityKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!("vlan".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::Kea(KeaError::Transport("down".to_string())).is_fatal());
        assert!(!SyncError::Kea(KeaError::SubnetNotFound(1)).is_fatal());
        assert!(
            !SyncError::Kea(KeaError::Rejected {
                command: "config-test".to_string(),
                text: "bad".to_string(),
            })
            .is_fatal()
        );
        assert!(
            !SyncError::InvalidEntity {
                kind: "range",
                id: 1,
                reason: "bad".to_string(),
            }
            .is_fatal()
        );
    }
}
