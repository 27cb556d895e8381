use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Capabilities a requester may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadTag,
    WriteTag,
    AddTag,
    DeleteTag,
    ManageUsers,
    #[serde(other)]
    Other,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadTag => "read_tag",
            Self::WriteTag => "write_tag",
            Self::AddTag => "add_tag",
            Self::DeleteTag => "delete_tag",
            Self::ManageUsers => "manage_users",
            Self::Other => "other",
        }
    }

    /// Parses one permission string; unknown strings map to `Other`
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "read_tag" => Self::ReadTag,
            "write_tag" => Self::WriteTag,
            "add_tag" => Self::AddTag,
            "delete_tag" => Self::DeleteTag,
            "manage_users" => Self::ManageUsers,
            _ => Self::Other,
        }
    }
}

/// Identity and capability set attached to a command.
///
/// Authentication happens upstream; the gateway only checks capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub username: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Requester {
    pub fn new(username: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            username: username.into(),
            permissions,
        }
    }

    /// No identity and no capabilities
    pub fn anonymous() -> Self {
        Self::new("Anonymous", Vec::new())
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), DomainError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(DomainError::PermissionDenied(permission.as_str().to_string()))
        }
    }
}
