use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::DomainError;
use domain::event::SnapshotSink;
use domain::tag::Snapshot;
use serde::{Deserialize, Serialize};

use super::JsonlWriter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub values: Snapshot,
}

/// Durable snapshot history, one row per non-empty tick.
pub struct JsonlHistorySink {
    writer: JsonlWriter,
}

impl JsonlHistorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            writer: JsonlWriter::new(path),
        }
    }

    pub async fn tail(&self, limit: usize) -> Result<Vec<HistoryRow>, DomainError> {
        self.writer.tail(limit).await
    }
}

#[async_trait]
impl SnapshotSink for JsonlHistorySink {
    fn name(&self) -> &str {
        "history"
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        if snapshot.is_empty() {
            return Ok(());
        }
        let row = HistoryRow {
            timestamp: Utc::now(),
            values: snapshot.clone(),
        };
        self.writer.append(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_snapshot_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlHistorySink::new(dir.path().join("h.jsonl"));

        sink.publish(&Snapshot::new()).await.unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.insert("Speed".into(), json!(12));
        sink.publish(&snapshot).await.unwrap();

        let rows = sink.tail(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["Speed"], json!(12));
    }
}
