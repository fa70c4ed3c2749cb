use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipnet::IpNet;
use serde_json::{Map, Value, json};

use super::lock;
use crate::attrs;
use crate::ipam::{
    AddressFilter, IpAddress, IpRange, IpamError, IpamSource, Prefix, Result, host,
};

const INTERFACE: &str = "dcim.interface";
const VM_INTERFACE: &str = "virtualization.vminterface";

#[derive(Default)]
struct Inventory {
    prefixes: Vec<Prefix>,
    ranges: Vec<IpRange>,
    addresses: Vec<IpAddress>,
    unreachable: bool,
}

/// In-memory IPAM inventory answering queries the way NetBox does.
///
/// Like [`NetboxClient`](crate::ipam::NetboxClient), address queries skip
/// addresses whose interface has no MAC address.
#[derive(Clone, Default)]
pub struct MemoryIpam {
    inventory: Arc<Mutex<Inventory>>,
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl MemoryIpam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(&self, id: u64, prefix: &str) -> &Self {
        self.prefix_with(id, prefix, json!({}))
    }

    /// Add a prefix with extra attributes, e.g. `custom_fields`.
    pub fn prefix_with(&self, id: u64, prefix: &str, extra: Value) -> &Self {
        let mut inventory = lock(&self.inventory);
        inventory.prefixes.retain(|p| p.id != id);
        inventory.prefixes.push(Prefix {
            id,
            prefix: prefix.to_string(),
            fields: fields(extra),
        });
        drop(inventory);
        self
    }

    pub fn range(&self, id: u64, start: &str, end: &str) -> &Self {
        let mut inventory = lock(&self.inventory);
        inventory.ranges.retain(|r| r.id != id);
        inventory.ranges.push(IpRange {
            id,
            start_address: start.to_string(),
            end_address: end.to_string(),
            fields: Map::new(),
        });
        drop(inventory);
        self
    }

    /// Add an address assigned to a device interface.
    pub fn interface_address(
        &self,
        id: u64,
        address: &str,
        interface_id: u64,
        device_id: u64,
        mac: Option<&str>,
    ) -> &Self {
        self.address_with(
            id,
            address,
            json!({
                "assigned_object_type": INTERFACE,
                "assigned_object_id": interface_id,
                "assigned_object": {
                    "id": interface_id,
                    "name": format!("eth{}", interface_id),
                    "mac_address": mac,
                    "device": {"id": device_id, "name": format!("device-{}", device_id)},
                },
            }),
        )
    }

    /// Add an address assigned to a virtual machine interface.
    pub fn vm_address(
        &self,
        id: u64,
        address: &str,
        vminterface_id: u64,
        vm_id: u64,
        mac: Option<&str>,
    ) -> &Self {
        self.address_with(
            id,
            address,
            json!({
                "assigned_object_type": VM_INTERFACE,
                "assigned_object_id": vminterface_id,
                "assigned_object": {
                    "id": vminterface_id,
                    "name": format!("vnet{}", vminterface_id),
                    "mac_address": mac,
                    "virtual_machine": {"id": vm_id, "name": format!("vm-{}", vm_id)},
                },
            }),
        )
    }

    pub fn address_with(&self, id: u64, address: &str, extra: Value) -> &Self {
        let mut inventory = lock(&self.inventory);
        inventory.addresses.retain(|a| a.id != id);
        inventory.addresses.push(IpAddress {
            id,
            address: address.to_string(),
            fields: fields(extra),
        });
        drop(inventory);
        self
    }

    pub fn remove_prefix(&self, id: u64) -> &Self {
        lock(&self.inventory).prefixes.retain(|p| p.id != id);
        self
    }

    pub fn remove_range(&self, id: u64) -> &Self {
        lock(&self.inventory).ranges.retain(|r| r.id != id);
        self
    }

    pub fn remove_address(&self, id: u64) -> &Self {
        lock(&self.inventory).addresses.retain(|a| a.id != id);
        self
    }

    /// Make every query fail as if IPAM were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.inventory).unreachable = unreachable;
    }

    fn inventory(&self) -> Result<std::sync::MutexGuard<'_, Inventory>> {
        let inventory = lock(&self.inventory);
        if inventory.unreachable {
            return Err(IpamError::Status {
                url: "memory://ipam".to_string(),
                status: 503,
            });
        }
        Ok(inventory)
    }
}

fn assigned_id(address: &IpAddress, path: &str) -> Option<u64> {
    attrs::resolve(address, path).and_then(|v| v.as_u64())
}

fn assigned_type(address: &IpAddress) -> Option<String> {
    attrs::resolve(address, "assigned_object_type").and_then(|v| v.as_str().map(str::to_string))
}

fn matches(address: &IpAddress, filter: &AddressFilter) -> bool {
    match filter {
        AddressFilter::Parent(parent) => match (parent.parse::<IpNet>(), address.ip()) {
            (Ok(net), Some(ip)) => net.contains(&ip),
            _ => false,
        },
        AddressFilter::Interface(id) => {
            assigned_type(address).as_deref() == Some(INTERFACE)
                && assigned_id(address, "assigned_object_id") == Some(*id)
        }
        AddressFilter::Device(id) => assigned_id(address, "assigned_object.device.id") == Some(*id),
        AddressFilter::VmInterface(id) => {
            assigned_type(address).as_deref() == Some(VM_INTERFACE)
                && assigned_id(address, "assigned_object_id") == Some(*id)
        }
        AddressFilter::VirtualMachine(id) => {
            assigned_id(address, "assigned_object.virtual_machine.id") == Some(*id)
        }
    }
}

#[async_trait]
impl IpamSource for MemoryIpam {
    async fn prefix(&self, id: u64) -> Result<Option<Prefix>> {
        Ok(self.inventory()?.prefixes.iter().find(|p| p.id == id).cloned())
    }

    async fn prefixes_containing(&self, address: &str) -> Result<Vec<Prefix>> {
        let Some(ip) = host(address) else {
            return Ok(Vec::new());
        };
        Ok(self
            .inventory()?
            .prefixes
            .iter()
            .filter(|p| p.network().is_some_and(|net| net.contains(&ip)))
            .cloned()
            .collect())
    }

    async fn all_prefixes(&self) -> Result<Vec<Prefix>> {
        Ok(self.inventory()?.prefixes.clone())
    }

    async fn ip_range(&self, id: u64) -> Result<Option<IpRange>> {
        Ok(self.inventory()?.ranges.iter().find(|r| r.id == id).cloned())
    }

    async fn ip_ranges_in(&self, parent: &str) -> Result<Vec<IpRange>> {
        Ok(self
            .inventory()?
            .ranges
            .iter()
            .filter(|r| r.within(parent))
            .cloned()
            .collect())
    }

    async fn ip_address(&self, id: u64) -> Result<Option<IpAddress>> {
        Ok(self
            .inventory()?
            .addresses
            .iter()
            .find(|a| a.id == id && a.has_mac())
            .cloned())
    }

    async fn ip_addresses(&self, filter: &AddressFilter) -> Result<Vec<IpAddress>> {
        Ok(self
            .inventory()?
            .addresses
            .iter()
            .filter(|a| a.has_mac() && matches(a, filter))
            .cloned()
            .collect())
    }
}
