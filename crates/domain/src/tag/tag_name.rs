use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Value object representing a logical tag name
///
/// Rules:
/// - Must be non-empty after trimming
/// - Must contain only alphanumeric, underscore, hyphen, dot and forward slash
/// - Max length 100 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagName(String);

impl TagName {
    /// Create a new TagName with validation
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();

        if name.is_empty() {
            return Err(DomainError::InvalidTagName(
                "Tag name cannot be empty".to_string(),
            ));
        }

        if name.len() > 100 {
            return Err(DomainError::InvalidTagName(format!(
                "Tag name too long: {} chars (max 100)",
                name.len()
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
        {
            return Err(DomainError::InvalidTagName(format!(
                "Tag name {name} must contain only alphanumeric, underscore, hyphen, dot and forward slash"
            )));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
