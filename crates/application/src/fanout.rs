use std::sync::Arc;
use std::time::Duration;

use domain::GatewayEvent;
use domain::event::SnapshotSink;
use domain::tag::{RawSnapshot, Snapshot};
use tracing::{debug, warn};

use crate::hub::LiveHub;

const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(2);

/// Flattens a driver cache copy into `{tag: value}`, keeping tag order.
pub fn flatten(raw: &RawSnapshot) -> Snapshot {
    raw.iter()
        .map(|(name, cached)| (name.clone(), cached.flatten()))
        .collect()
}

/// Delivers each snapshot to live subscribers, then to every secondary sink.
pub struct Broadcaster {
    hub: Arc<LiveHub>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    sink_timeout: Duration,
}

impl Broadcaster {
    pub fn new(hub: Arc<LiveHub>) -> Self {
        Self {
            hub,
            sinks: Vec::new(),
            sink_timeout: DEFAULT_SINK_TIMEOUT,
        }
    }

    /// Upper bound on a single sink publish; a stalled sink is skipped for
    /// that snapshot.
    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Sinks run in registration order.
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Returns the flattened snapshot, or `None` when it was empty and
    /// nothing was emitted.
    pub async fn broadcast(&self, raw: &RawSnapshot) -> Option<Snapshot> {
        if raw.is_empty() {
            return None;
        }
        let snapshot = flatten(raw);

        self.hub.publish(GatewayEvent::PlcData(snapshot.clone()));

        for sink in &self.sinks {
            if !sink.is_available() {
                debug!(sink = sink.name(), "Sink unavailable, skipping");
                continue;
            }
            match tokio::time::timeout(self.sink_timeout, sink.publish(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(sink = sink.name(), "Failed to publish snapshot: {}", e),
                Err(_) => warn!(
                    sink = sink.name(),
                    timeout_ms = self.sink_timeout.as_millis() as u64,
                    "Sink publish timed out"
                ),
            }
        }

        Some(snapshot)
    }
}
