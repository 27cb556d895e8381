use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TagQuality;

/// A point-in-time value for one tag, as delivered by a push-model protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Protocol-native value (bool, number or string)
    pub value: Value,
    pub quality: TagQuality,
    /// Source timestamp if the server supplied one, else arrival time
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: Value, quality: TagQuality, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            quality,
            timestamp,
        }
    }

    pub fn good(value: Value) -> Self {
        Self::new(value, TagQuality::Good, Utc::now())
    }
}
