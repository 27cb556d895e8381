use std::collections::BTreeMap;

/// Logical tag name -> protocol address.
pub type TagTable = BTreeMap<String, String>;

/// Tag name -> flattened value, in the order the driver registered the tags.
pub type Snapshot = serde_json::Map<String, serde_json::Value>;

/// Effective table: every overlay entry shadows the base entry of the same name.
pub fn merge_layers(base: &TagTable, overlay: &TagTable) -> TagTable {
    let mut effective = base.clone();
    effective.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    effective
}
