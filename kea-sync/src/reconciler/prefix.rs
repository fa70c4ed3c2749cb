use tracing::{error, warn};

use super::{Reconciler, Result};
use crate::ipam::{AddressFilter, Prefix};
use crate::kea::{CommitMode, SubnetItem};

/// How a prefix is written to its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Update the subnet options in place, keeping pools and reservations.
    Patch,
    /// Rewrite the subnet, then every range and address it contains.
    Full,
}

impl Reconciler {
    pub async fn sync_prefix(&mut self, id: u64) -> Result<()> {
        match self.ipam.prefix(id).await? {
            Some(prefix) => self.prefix_to_subnet(&prefix, Strategy::Patch).await,
            None => Ok(self.kea.del_subnet(id, CommitMode::Auto).await?),
        }
    }

    fn subnet_item(&self, prefix: &Prefix) -> Result<SubnetItem> {
        let item = self.maps.subnet.build(prefix);
        Ok(SubnetItem::from_item(item, &prefix.prefix)?)
    }

    /// Write a prefix to its subnet. A patch that finds no subnet, or one
    /// with another network address, turns into a full resync.
    pub(super) async fn prefix_to_subnet(&mut self, prefix: &Prefix, strategy: Strategy) -> Result<()> {
        let subnet = self.subnet_item(prefix)?;

        if strategy == Strategy::Patch {
            match self
                .kea
                .update_subnet(prefix.id, subnet.clone(), CommitMode::Auto)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_escalation() => {
                    warn!("prefix {}: {}, full resync", prefix, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.kea
            .set_subnet(prefix.id, subnet, CommitMode::Auto)
            .await?;

        let addresses = self
            .ipam
            .ip_addresses(&AddressFilter::Parent(prefix.prefix.clone()))
            .await?;
        for address in &addresses {
            if let Err(e) = self.ipaddr_to_resa(address, prefix).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("prefix {} > IP {}: {}", prefix, address, e);
            }
        }

        let ranges = self.ipam.ip_ranges_in(&prefix.prefix).await?;
        for range in &ranges {
            if let Err(e) = self.iprange_to_pool(range, prefix).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("prefix {} > range {}: {}", prefix, range, e);
            }
        }
        Ok(())
    }
}
