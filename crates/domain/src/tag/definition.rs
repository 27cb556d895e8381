use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TagDataType, TagName};

/// A tag as created by an operator: where it lives and who owns it.
///
/// Base tags have no definition record; only tags added at runtime (or
/// imported from the flow engine) carry ownership metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub datatype: Option<TagDataType>,
    pub owner: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TagDefinition {
    pub fn new(
        name: TagName,
        address: impl Into<String>,
        datatype: Option<TagDataType>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into_string(),
            address: address.into().trim().to_string(),
            datatype,
            owner: owner.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
