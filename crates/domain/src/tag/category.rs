use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::{TagDefinition, TagTable};

/// Placeholder names the PLC programmers reserve for future signals.
static EMPTY_SLOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(SPARE|BOOL_|INT_|WORD_|DINT_|REAL_|BYTE_)").expect("static pattern")
});

/// Presentation buckets of the effective tag table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategorizedTags {
    /// Every tag that is not a reserved placeholder
    pub active: BTreeMap<String, String>,
    /// Reserved placeholders (`SPARE_5`, `BOOL_050`, ...)
    pub empty: BTreeMap<String, String>,
    /// Tags with ownership metadata, i.e. created at runtime
    pub new: BTreeMap<String, TagDefinition>,
    /// Everything else
    pub old: BTreeMap<String, String>,
}

pub fn categorize(tags: &TagTable, metadata: &BTreeMap<String, TagDefinition>) -> CategorizedTags {
    let mut buckets = CategorizedTags::default();

    for (name, address) in tags {
        let placeholder = EMPTY_SLOT.is_match(name);

        if let Some(meta) = metadata.get(name) {
            let mut entry = meta.clone();
            entry.address = address.clone();
            buckets.new.insert(name.clone(), entry);
        } else if placeholder {
            buckets.empty.insert(name.clone(), address.clone());
        } else {
            buckets.old.insert(name.clone(), address.clone());
        }

        if !placeholder {
            buckets.active.insert(name.clone(), address.clone());
        }
    }

    buckets
}
