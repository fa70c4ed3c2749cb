use serde_json::Value;
use tracing::debug;

use super::{Child, Reconciler, Result, SyncError};
use crate::attrs;
use crate::ipam::{IpAddress, Prefix};
use crate::kea::{CommitMode, ReservationItem};

impl Reconciler {
    pub async fn sync_ipaddress(&mut self, id: u64) -> Result<()> {
        let Some(address) = self.ipam.ip_address(id).await? else {
            return Ok(self.kea.del_resa(id, CommitMode::Auto).await?);
        };
        let Some(child) = self.reservation_child(&address)? else {
            return self.forget(&address).await;
        };
        self.relocate(&child, &address.address).await
    }

    /// Stage an address as a reservation of a prefix being resynced.
    pub(super) async fn ipaddr_to_resa(&mut self, address: &IpAddress, prefix: &Prefix) -> Result<()> {
        let Some(child) = self.reservation_child(address)? else {
            return self.forget(address).await;
        };
        self.place(&child, &address.address, Some(prefix))
            .await?
            .into_result()
    }

    async fn forget(&mut self, address: &IpAddress) -> Result<()> {
        debug!("IP {}: no MAC address known, drop reservation", address);
        Ok(self.kea.del_resa(address.id, CommitMode::Auto).await?)
    }

    /// `None` when the mapping yields no hardware address.
    fn reservation_child(&self, address: &IpAddress) -> Result<Option<Child>> {
        let mut item = self.maps.reservation.build(address);
        if item.get("hw-address").is_none_or(attrs::is_empty) {
            return Ok(None);
        }

        let ip = address.ip().ok_or_else(|| SyncError::InvalidEntity {
            kind: "IP address",
            id: address.id,
            reason: format!("cannot parse {}", address),
        })?;
        item.insert("ip-address".to_string(), Value::String(ip.to_string()));
        Ok(Some(Child::Reservation {
            ipaddr_id: address.id,
            item: ReservationItem::from_item(item)?,
        }))
    }
}
