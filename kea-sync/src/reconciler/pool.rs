use super::{Child, Reconciler, Result, SyncError};
use crate::ipam::{IpRange, Prefix};
use crate::kea::{CommitMode, PoolItem};

impl Reconciler {
    pub async fn sync_iprange(&mut self, id: u64) -> Result<()> {
        let Some(range) = self.ipam.ip_range(id).await? else {
            return Ok(self.kea.del_pool(id, CommitMode::Auto).await?);
        };
        let child = self.pool_child(&range)?;
        self.relocate(&child, &range.start_address).await
    }

    /// Stage a range as a pool of a prefix being resynced.
    pub(super) async fn iprange_to_pool(&mut self, range: &IpRange, prefix: &Prefix) -> Result<()> {
        let child = self.pool_child(range)?;
        self.place(&child, &range.start_address, Some(prefix))
            .await?
            .into_result()
    }

    fn pool_child(&self, range: &IpRange) -> Result<Child> {
        let (start, end) = range.hosts().ok_or_else(|| SyncError::InvalidEntity {
            kind: "range",
            id: range.id,
            reason: format!("cannot parse {}", range),
        })?;
        let item = self.maps.pool.build(range);
        Ok(Child::Pool {
            range_id: range.id,
            item: PoolItem::from_item(item, &format!("{}-{}", start, end))?,
        })
    }
}
