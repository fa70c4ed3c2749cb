//! Typed view of the Kea `Dhcp4` configuration document.
//!
//! Only the keys the staging store reasons about are typed. Everything else
//! the server sends is kept verbatim in `extra` and sent back untouched.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{KeaError, Result};

pub const PREFIX_ID: &str = "netbox_prefix_id";
pub const IP_RANGE_ID: &str = "netbox_ip_range_id";
pub const IP_ADDRESS_ID: &str = "netbox_ip_address_id";

/// The `Dhcp4` configuration document exchanged with the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dhcp4Config {
    #[serde(default)]
    pub subnet4: Vec<SubnetItem>,
    #[serde(
        rename = "ip-reservations-unique",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ip_reservations_unique: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dhcp4Config {
    /// Whether reservations must not share an IP address. Kea defaults to true.
    pub fn ip_uniqueness(&self) -> bool {
        self.ip_reservations_unique.unwrap_or(true)
    }
}

/// A `subnet4` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub subnet: String,
    #[serde(default)]
    pub pools: Vec<PoolItem>,
    #[serde(default)]
    pub reservations: Vec<ReservationItem>,
    #[serde(rename = "user-context", default, skip_serializing_if = "Map::is_empty")]
    pub user_context: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubnetItem {
    pub fn new(subnet: impl Into<String>) -> Self {
        Self {
            id: None,
            subnet: subnet.into(),
            pools: Vec::new(),
            reservations: Vec::new(),
            user_context: Map::new(),
            extra: Map::new(),
        }
    }

    /// Build a subnet from a mapped item and its network address.
    pub fn from_item(mut item: Map<String, Value>, subnet: &str) -> Result<Self> {
        item.insert("subnet".to_string(), Value::String(subnet.to_string()));
        Ok(serde_json::from_value(Value::Object(item))?)
    }
}

/// A pool of dynamically leased addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolItem {
    pub pool: String,
    #[serde(rename = "user-context", default, skip_serializing_if = "Map::is_empty")]
    pub user_context: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PoolItem {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            user_context: Map::new(),
            extra: Map::new(),
        }
    }

    /// Build a pool from a mapped item and its address range.
    pub fn from_item(mut item: Map<String, Value>, pool: &str) -> Result<Self> {
        item.insert("pool".to_string(), Value::String(pool.to_string()));
        Ok(serde_json::from_value(Value::Object(item))?)
    }

    pub fn range_id(&self) -> Option<u64> {
        context_id(&self.user_context, IP_RANGE_ID)
    }

    pub fn bounds(&self) -> Result<(IpAddr, IpAddr)> {
        pool_bounds(&self.pool)
    }
}

/// A host reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationItem {
    #[serde(rename = "ip-address", default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(rename = "hw-address", default, skip_serializing_if = "Option::is_none")]
    pub hw_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(rename = "user-context", default, skip_serializing_if = "Map::is_empty")]
    pub user_context: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReservationItem {
    pub fn new(ip_address: impl Into<String>, hw_address: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            hw_address: Some(hw_address.into()),
            hostname: None,
            user_context: Map::new(),
            extra: Map::new(),
        }
    }

    /// Build a reservation from a mapped item.
    pub fn from_item(item: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(item))?)
    }

    pub fn ipaddr_id(&self) -> Option<u64> {
        context_id(&self.user_context, IP_ADDRESS_ID)
    }
}

/// How a subnet is bound to the prefix it was built from.
///
/// Chosen once per process; pools and reservations always use their
/// `user-context`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetCorrelation {
    /// The Kea subnet `id` is the prefix ID.
    #[default]
    SubnetId,
    /// `user-context.netbox_prefix_id` holds the prefix ID.
    UserContext,
}

impl SubnetCorrelation {
    pub fn prefix_id(self, subnet: &SubnetItem) -> Option<u64> {
        match self {
            SubnetCorrelation::SubnetId => subnet.id,
            SubnetCorrelation::UserContext => context_id(&subnet.user_context, PREFIX_ID),
        }
    }

    pub fn bind(self, subnet: &mut SubnetItem, prefix_id: u64) {
        match self {
            SubnetCorrelation::SubnetId => subnet.id = Some(prefix_id),
            SubnetCorrelation::UserContext => {
                subnet
                    .user_context
                    .insert(PREFIX_ID.to_string(), Value::from(prefix_id));
            }
        }
    }
}

fn context_id(context: &Map<String, Value>, key: &str) -> Option<u64> {
    context.get(key).and_then(Value::as_u64)
}

/// First and last address of a pool written as `start-end` or as a network.
pub fn pool_bounds(pool: &str) -> Result<(IpAddr, IpAddr)> {
    let invalid = || KeaError::InvalidPool(pool.to_string());

    let (start, end) = match pool.split_once('-') {
        Some((start, end)) => (
            parse_host(start).ok_or_else(invalid)?,
            parse_host(end).ok_or_else(invalid)?,
        ),
        None => {
            let net: IpNet = pool.trim().parse().map_err(|_| invalid())?;
            (net.network(), net.broadcast())
        }
    };

    if start.is_ipv4() != end.is_ipv4() || start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

/// Whether two inclusive address intervals share at least one address.
pub fn ranges_overlap(a: (IpAddr, IpAddr), b: (IpAddr, IpAddr)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Whether two subnet strings denote the same network.
pub fn same_network(a: &str, b: &str) -> bool {
    match (a.trim().parse::<IpNet>(), b.trim().parse::<IpNet>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

fn parse_host(s: &str) -> Option<IpAddr> {
    let s = s.trim();
    s.parse::<IpAddr>()
        .ok()
        .or_else(|| s.parse::<IpNet>().ok().map(|net| net.addr()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_pull_shape_defaults_lists() {
        let config: Dhcp4Config = serde_json::from_value(json!({
            "subnet4": [{"id": 7, "subnet": "10.0.0.0/24", "valid-lifetime": 600}],
            "interfaces-config": {"interfaces": ["eth0"]},
        }))
        .unwrap();

        let subnet = &config.subnet4[0];
        assert!(subnet.pools.is_empty());
        assert!(subnet.reservations.is_empty());
        assert_eq!(subnet.extra["valid-lifetime"], json!(600));
        assert!(config.ip_uniqueness());
        assert!(config.extra.contains_key("interfaces-config"));
    }

    #[test]
    fn test_missing_correlation_is_none() {
        let pool: PoolItem = serde_json::from_value(json!({"pool": "10.0.0.10-10.0.0.20"})).unwrap();
        assert_eq!(pool.range_id(), None);

        let resa: ReservationItem =
            serde_json::from_value(json!({"hw-address": "aa:bb:cc:dd:ee:ff"})).unwrap();
        assert_eq!(resa.ipaddr_id(), None);
        assert_eq!(resa.ip_address, None);
    }

    #[test]
    fn test_correlation_schemes() {
        let mut subnet = SubnetItem::new("10.0.0.0/24");
        SubnetCorrelation::SubnetId.bind(&mut subnet, 100);
        assert_eq!(subnet.id, Some(100));
        assert_eq!(SubnetCorrelation::UserContext.prefix_id(&subnet), None);

        let mut subnet = SubnetItem::new("10.0.0.0/24");
        SubnetCorrelation::UserContext.bind(&mut subnet, 100);
        assert_eq!(subnet.id, None);
        assert_eq!(SubnetCorrelation::UserContext.prefix_id(&subnet), Some(100));
        assert_eq!(
            serde_json::to_value(&subnet).unwrap(),
            json!({
                "subnet": "10.0.0.0/24",
                "pools": [],
                "reservations": [],
                "user-context": {"netbox_prefix_id": 100},
            })
        );
    }

    #[test]
    fn test_pool_bounds() {
        assert_eq!(
            pool_bounds("192.168.0.100-192.168.0.199").unwrap(),
            (ip("192.168.0.100"), ip("192.168.0.199"))
        );
        assert_eq!(
            pool_bounds("192.168.0.100 - 192.168.0.199").unwrap(),
            (ip("192.168.0.100"), ip("192.168.0.199"))
        );
        assert_eq!(
            pool_bounds("192.168.1.0/25").unwrap(),
            (ip("192.168.1.0"), ip("192.168.1.127"))
        );
        assert!(pool_bounds("192.168.0.199-192.168.0.100").is_err());
        assert!(pool_bounds("192.168.0.1-fe80::1").is_err());
        assert!(pool_bounds("garbage").is_err());
    }

    #[test]
    fn test_ranges_overlap() {
        let a = (ip("10.0.0.10"), ip("10.0.0.20"));
        assert!(ranges_overlap(a, (ip("10.0.0.15"), ip("10.0.0.30"))));
        assert!(ranges_overlap(a, (ip("10.0.0.20"), ip("10.0.0.30"))));
        assert!(ranges_overlap(a, (ip("10.0.0.0"), ip("10.0.0.255"))));
        assert!(!ranges_overlap(a, (ip("10.0.0.21"), ip("10.0.0.30"))));
    }

    #[test]
    fn test_same_network() {
        assert!(same_network("10.0.0.0/24", " 10.0.0.0/24"));
        assert!(!same_network("10.0.0.0/24", "10.0.0.0/25"));
        assert!(same_network("not-a-net", "not-a-net"));
    }
}
