//! Nested attribute lookup over IPAM records.
//!
//! A path such as `assigned_object.mac_address` is walked one segment at a
//! time. The first segment is looked up on the record's members before its
//! raw field map; later segments step into JSON objects by key and into
//! arrays by index. A missing segment anywhere yields `None`, never an error.

use serde_json::{Map, Value};

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// A source object whose attributes can be addressed by dotted paths.
pub trait Record {
    /// Typed or computed member. Tried before the raw field map.
    fn member(&self, name: &str) -> Option<Value>;

    /// Raw attribute bag as delivered by the source.
    fn fields(&self) -> &Map<String, Value>;
}

impl Record for Map<String, Value> {
    fn member(&self, _name: &str) -> Option<Value> {
        None
    }

    fn fields(&self) -> &Map<String, Value> {
        self
    }
}

/// Resolve a single dotted path against a record.
pub fn resolve(record: &dyn Record, path: &str) -> Option<Value> {
    let mut segments = path.split(SEPARATOR);
    let first = segments.next()?;
    let mut value = record
        .member(first)
        .or_else(|| record.fields().get(first).cloned())?;

    for segment in segments {
        value = step(value, segment)?;
    }
    Some(value)
}

/// Resolve the first candidate path holding a non-empty value.
pub fn resolve_first<S: AsRef<str>>(record: &dyn Record, paths: &[S]) -> Option<Value> {
    paths
        .iter()
        .filter_map(|path| resolve(record, path.as_ref()))
        .find(|value| !is_empty(value))
}

/// Null, empty strings, empty lists and empty objects count as "no value".
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn step(value: Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(mut map) => map.remove(segment),
        Value::Array(mut items) => {
            let index: usize = segment.parse().ok()?;
            (index < items.len()).then(|| items.swap_remove(index))
        }
        _ => None,
    }
}
