use std::collections::HashMap;

use serde_json::Value;

use super::Sample;

/// Shown for a tag that has been registered but not read yet.
pub const WAITING_SENTINEL: &str = "WAITING...";
/// Shown for a tag whose address does not parse for the active protocol.
pub const INVALID_FORMAT_SENTINEL: &str = "INVALID_FMT";

/// One entry of a driver's last-known value cache.
///
/// Poll-model drivers store bare values, push-model drivers store structured
/// samples. Consumers flatten both with [`CachedValue::flatten`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Pending,
    InvalidFormat,
    Value(Value),
    Sample(Sample),
}

impl CachedValue {
    pub fn flatten(&self) -> Value {
        match self {
            Self::Pending => Value::String(WAITING_SENTINEL.to_string()),
            Self::InvalidFormat => Value::String(INVALID_FORMAT_SENTINEL.to_string()),
            Self::Value(value) => value.clone(),
            Self::Sample(sample) => sample.value.clone(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Pending | Self::InvalidFormat)
    }
}

/// Ordered copy of a driver cache, in tag insertion order.
pub type RawSnapshot = Vec<(String, CachedValue)>;

/// Last-known value cache keyed by tag name that remembers insertion order.
#[derive(Debug, Default, Clone)]
pub struct SampleCache {
    order: Vec<String>,
    values: HashMap<String, CachedValue>,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a value; a replaced tag keeps its position.
    pub fn insert(&mut self, name: &str, value: CachedValue) {
        if self.values.insert(name.to_string(), value).is_none() {
            self.order.push(name.to_string());
        }
    }

    /// Inserts only when the tag has no entry yet.
    pub fn insert_if_absent(&mut self, name: &str, value: CachedValue) {
        if !self.values.contains_key(name) {
            self.insert(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<CachedValue> {
        let removed = self.values.remove(name);
        if removed.is_some() {
            self.order.retain(|n| n != name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&CachedValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.values.clear();
    }

    pub fn snapshot(&self) -> RawSnapshot {
        self.order
            .iter()
            .filter_map(|name| {
                self.values
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }
}
