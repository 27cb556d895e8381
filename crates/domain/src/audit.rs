use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Auditable command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Connect,
    AddTag,
    DeleteTag,
    WriteTag,
    ImportTags,
    SyncFlow,
    /// A command refused by the capability check
    Denied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub action: AuditAction,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(user: impl Into<String>, action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user: user.into(),
            action,
            details: details.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}
