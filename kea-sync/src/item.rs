//! Builds DHCP configuration items from IPAM records.
//!
//! An [`ItemMap`] binds target keys of a Kea item to one or more source
//! attribute paths. Keys containing a dot address nested maps, except
//! `option-data.<name>` which accumulates `{name, data}` entries in a list.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::attrs::{self, Record, SEPARATOR};

/// Kea key holding a list of `{name, data}` option entries.
pub const OPTION_DATA: &str = "option-data";

/// One source path or an ordered list of fallback paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sources {
    One(String),
    Many(Vec<String>),
}

impl Sources {
    pub fn paths(&self) -> &[String] {
        match self {
            Sources::One(path) => std::slice::from_ref(path),
            Sources::Many(paths) => paths,
        }
    }
}

impl From<&str> for Sources {
    fn from(path: &str) -> Self {
        Sources::One(path.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for Sources {
    fn from(paths: [&str; N]) -> Self {
        Sources::Many(paths.iter().map(|p| p.to_string()).collect())
    }
}

/// Mapping from Kea item keys to IPAM attribute paths.
///
/// Keys keep their declaration order, which is the order of the built
/// `option-data` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMap(Vec<(String, Sources)>);

impl ItemMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the sources of a target key, or replace them in place.
    pub fn with(mut self, key: impl Into<String>, sources: impl Into<Sources>) -> Self {
        let (key, sources) = (key.into(), sources.into());
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, current)) => *current = sources,
            None => self.0.push((key, sources)),
        }
        self
    }

    /// Build a configuration item. Keys without a value are left out.
    pub fn build(&self, record: &dyn Record) -> Map<String, Value> {
        let mut item = Map::new();
        for (key, sources) in &self.0 {
            if let Some(value) = attrs::resolve_first(record, sources.paths()) {
                set_attr(&mut item, key, value);
            }
        }
        item
    }
}

impl<'de> Deserialize<'de> for ItemMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ItemMapVisitor;

        impl<'de> Visitor<'de> for ItemMapVisitor {
            type Value = ItemMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a table of item keys to attribute paths")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ItemMap, A::Error> {
                let mut map = ItemMap::new();
                while let Some((key, sources)) = access.next_entry::<String, Sources>()? {
                    if map.0.iter().any(|(k, _)| *k == key) {
                        let msg = format!("duplicate item key \"{}\"", key);
                        return Err(de::Error::custom(msg));
                    }
                    map.0.push((key, sources));
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ItemMapVisitor)
    }
}

/// Default subnet mapping, reading `dhcp_*` custom fields of a prefix.
pub fn default_subnet_map() -> ItemMap {
    ItemMap::new()
        .with(
            "option-data.routers",
            "custom_fields.dhcp_option_data_routers",
        )
        .with(
            "option-data.domain-search",
            "custom_fields.dhcp_option_data_domain_search",
        )
        .with(
            "option-data.domain-name-servers",
            "custom_fields.dhcp_option_data_domain_name_servers",
        )
        .with("next-server", "custom_fields.dhcp_next_server")
        .with("boot-file-name", "custom_fields.dhcp_boot_file_name")
        .with("valid-lifetime", "custom_fields.dhcp_valid_lifetime")
}

/// Default pool mapping. Pools carry only their range.
pub fn default_pool_map() -> ItemMap {
    ItemMap::new()
}

/// Default reservation mapping.
pub fn default_reservation_map() -> ItemMap {
    ItemMap::new()
        .with(
            "hw-address",
            [
                "custom_fields.dhcp_resa_hw_address",
                "assigned_object.mac_address",
            ],
        )
        .with("hostname", "dns_name")
}

/// The three mappings used by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMaps {
    pub subnet: ItemMap,
    pub pool: ItemMap,
    pub reservation: ItemMap,
}

impl Default for ItemMaps {
    fn default() -> Self {
        Self {
            subnet: default_subnet_map(),
            pool: default_pool_map(),
            reservation: default_reservation_map(),
        }
    }
}

fn set_attr(item: &mut Map<String, Value>, key: &str, value: Value) {
    let Some((parent, child)) = key.split_once(SEPARATOR) else {
        item.insert(key.to_string(), value);
        return;
    };

    if parent == OPTION_DATA {
        let entry = item
            .entry(OPTION_DATA)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(options) = entry {
            options.push(json!({"name": child, "data": value}));
        }
        return;
    }

    let entry = item
        .entry(parent)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(nested) = entry {
        set_nested(nested, child, value);
    }
}

fn set_nested(map: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once(SEPARATOR) {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((parent, child)) => {
            let entry = map
                .entry(parent)
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                set_nested(nested, child, value);
            }
        }
    }
}
