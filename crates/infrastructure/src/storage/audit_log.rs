use std::path::PathBuf;

use async_trait::async_trait;
use domain::DomainError;
use domain::audit::AuditEntry;
use domain::event::AuditSink;

use super::JsonlWriter;

/// Audit trail as one JSON object per line.
pub struct JsonlAuditLog {
    writer: JsonlWriter,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            writer: JsonlWriter::new(path),
        }
    }

    /// Most recent entries, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, DomainError> {
        let mut rows: Vec<AuditEntry> = self.writer.tail(limit).await?;
        rows.reverse();
        Ok(rows)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), DomainError> {
        tracing::debug!(user = %entry.user, action = ?entry.action, "Audit");
        self.writer.append(&entry).await
    }
}
