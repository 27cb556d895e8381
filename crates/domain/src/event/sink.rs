use async_trait::async_trait;

use crate::audit::AuditEntry;
use crate::error::DomainError;
use crate::tag::Snapshot;

/// Secondary destination for flattened snapshots (telemetry, history).
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    fn name(&self) -> &str;

    /// Sinks that report unavailable are skipped for the tick
    fn is_available(&self) -> bool {
        true
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<(), DomainError>;
}

/// Records who did what. Failures are logged by the caller and never fail
/// the command that produced the entry.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), DomainError>;
}
