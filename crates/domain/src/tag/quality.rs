use serde::{Deserialize, Serialize};

/// Sample quality indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagQuality {
    /// Value is valid and trustworthy
    Good,
    /// Value is invalid or corrupted
    Bad,
    /// Value quality is uncertain
    Uncertain,
}

impl TagQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Bad => "bad",
            Self::Uncertain => "uncertain",
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Good)
    }

    /// Maps a protocol status name (e.g. `Good`, `BadNodeIdUnknown`,
    /// `UncertainLastUsableValue`) onto the three-level quality.
    pub fn from_status_name(name: &str) -> Self {
        if name.starts_with("Good") {
            Self::Good
        } else if name.starts_with("Uncertain") {
            Self::Uncertain
        } else {
            Self::Bad
        }
    }
}

impl Default for TagQuality {
    fn default() -> Self {
        Self::Uncertain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_as_str() {
        assert_eq!(TagQuality::Good.as_str(), "good");
        assert_eq!(TagQuality::Bad.as_str(), "bad");
        assert_eq!(TagQuality::Uncertain.as_str(), "uncertain");
    }

    #[test]
    fn test_is_usable() {
        assert!(TagQuality::Good.is_usable());
        assert!(!TagQuality::Bad.is_usable());
        assert!(!TagQuality::Uncertain.is_usable());
    }

    #[test]
    fn test_from_status_name() {
        assert_eq!(TagQuality::from_status_name("Good"), TagQuality::Good);
        assert_eq!(
            TagQuality::from_status_name("UncertainInitialValue"),
            TagQuality::Uncertain
        );
        assert_eq!(
            TagQuality::from_status_name("BadNodeIdUnknown"),
            TagQuality::Bad
        );
    }
}
