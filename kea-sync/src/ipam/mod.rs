//! IPAM source of truth: entity types and the query interface.
//!
//! Entities keep their raw JSON attributes next to the few typed fields the
//! reconciler needs, so item mappings can address any attribute by path.

pub mod error;
pub mod netbox;

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attrs::{self, Record};

pub use error::{IpamError, Result};
pub use netbox::NetboxClient;

/// An IPAM prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefix {
    pub id: u64,
    pub prefix: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// An IPAM range of addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpRange {
    pub id: u64,
    pub start_address: String,
    pub end_address: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// An IPAM address, written with its prefix length (`10.0.0.5/24`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAddress {
    pub id: u64,
    pub address: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Prefix {
    pub fn network(&self) -> Option<IpNet> {
        self.prefix.trim().parse().ok()
    }
}

impl IpRange {
    /// First and last host address, without prefix lengths.
    pub fn hosts(&self) -> Option<(IpAddr, IpAddr)> {
        Some((host(&self.start_address)?, host(&self.end_address)?))
    }

    /// Whether both ends of the range lie inside `parent`.
    pub fn within(&self, parent: &str) -> bool {
        match (parent.trim().parse::<IpNet>(), self.hosts()) {
            (Ok(net), Some((start, end))) => net.contains(&start) && net.contains(&end),
            _ => false,
        }
    }
}

impl IpAddress {
    /// Host address without the prefix length.
    pub fn ip(&self) -> Option<IpAddr> {
        host(&self.address)
    }

    /// Whether the assigned interface has a MAC address.
    pub fn has_mac(&self) -> bool {
        attrs::resolve(self, "assigned_object.mac_address").is_some_and(|v| !attrs::is_empty(&v))
    }
}

/// Host part of `10.0.0.5/24` or `10.0.0.5`.
pub fn host(address: &str) -> Option<IpAddr> {
    let address = address.trim();
    address
        .parse::<IpNet>()
        .map(|net| net.addr())
        .or_else(|_| address.parse::<IpAddr>())
        .ok()
}

impl Record for Prefix {
    fn member(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "prefix" => Some(Value::from(self.prefix.clone())),
            _ => None,
        }
    }

    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Record for IpRange {
    fn member(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "start_address" => Some(Value::from(self.start_address.clone())),
            "end_address" => Some(Value::from(self.end_address.clone())),
            _ => None,
        }
    }

    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Record for IpAddress {
    fn member(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "address" => Some(Value::from(self.address.clone())),
            "ip" => self.ip().map(|ip| Value::from(ip.to_string())),
            _ => None,
        }
    }

    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_address, self.end_address)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Selects addresses by containing network or by the object they are
/// assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFilter {
    Parent(String),
    Interface(u64),
    Device(u64),
    VmInterface(u64),
    VirtualMachine(u64),
}

impl AddressFilter {
    /// NetBox query parameter for this filter.
    pub fn query(&self) -> (&'static str, String) {
        match self {
            AddressFilter::Parent(net) => ("parent", net.clone()),
            AddressFilter::Interface(id) => ("interface_id", id.to_string()),
            AddressFilter::Device(id) => ("device_id", id.to_string()),
            AddressFilter::VmInterface(id) => ("vminterface_id", id.to_string()),
            AddressFilter::VirtualMachine(id) => ("virtual_machine_id", id.to_string()),
        }
    }
}

impl fmt::Display for AddressFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (key, value) = self.query();
        write!(f, "{}={}", key, value)
    }
}

/// Read-only view of the IPAM inventory.
///
/// Single-entity lookups return `None` when the entity is gone or excluded
/// by the configured filters. Address queries only return addresses
/// assigned to an interface with a known MAC address.
#[async_trait]
pub trait IpamSource: Send + Sync {
    async fn prefix(&self, id: u64) -> Result<Option<Prefix>>;

    /// Prefixes containing an address.
    async fn prefixes_containing(&self, address: &str) -> Result<Vec<Prefix>>;

    async fn all_prefixes(&self) -> Result<Vec<Prefix>>;

    async fn ip_range(&self, id: u64) -> Result<Option<IpRange>>;

    /// Ranges lying entirely inside a network.
    async fn ip_ranges_in(&self, parent: &str) -> Result<Vec<IpRange>>;

    async fn ip_address(&self, id: u64) -> Result<Option<IpAddress>>;

    async fn ip_addresses(&self, filter: &AddressFilter) -> Result<Vec<IpAddress>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use serde_json::json;

    #[test]
    fn test_address_members() {
        let addr: IpAddress = serde_json::from_value(json!({
            "id": 4,
            "address": "10.0.0.5/24",
            "dns_name": "pc.lan",
        }))
        .unwrap();
        assert_eq!(attrs::resolve(&addr, "ip"), Some(json!("10.0.0.5")));
        assert_eq!(attrs::resolve(&addr, "id"), Some(json!(4)));
        assert_eq!(attrs::resolve(&addr, "dns_name"), Some(json!("pc.lan")));
    }

    #[test]
    fn test_range_within() {
        let range: IpRange = serde_json::from_value(json!({
            "id": 1,
            "start_address": "10.0.0.10/24",
            "end_address": "10.0.0.20/24",
        }))
        .unwrap();
        assert!(range.within("10.0.0.0/24"));
        assert!(!range.within("10.0.0.0/28"));
        assert!(!range.within("10.1.0.0/16"));
    }

    #[test]
    fn test_host() {
        assert_eq!(host("10.0.0.5/24"), "10.0.0.5".parse().ok());
        assert_eq!(host("10.0.0.5"), "10.0.0.5".parse().ok());
        assert_eq!(host("nope"), None);
    }
}
