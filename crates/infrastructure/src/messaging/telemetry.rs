use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::DomainError;
use domain::event::SnapshotSink;
use domain::tag::Snapshot;
use rumqttc::QoS;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{BrokerAddress, MqttClient, MqttPublisherClient};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStatus {
    pub connected: bool,
    pub broker_url: Option<String>,
    pub topic: String,
}

struct Link {
    client: Arc<dyn MqttPublisherClient>,
    broker: Option<BrokerAddress>,
}

/// Publishes flattened snapshots to an MQTT topic.
///
/// The link can be re-pointed at runtime; the previous client is shut down.
pub struct MqttTelemetry {
    client_id: String,
    topic: RwLock<String>,
    link: RwLock<Option<Link>>,
}

impl MqttTelemetry {
    pub fn new(client_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            topic: RwLock::new(topic.into()),
            link: RwLock::new(None),
        }
    }

    /// Uses an already-built publisher
    pub fn with_client(
        client: Arc<dyn MqttPublisherClient>,
        topic: impl Into<String>,
    ) -> Self {
        let telemetry = Self::new("external", topic);
        if let Ok(mut link) = telemetry.link.write() {
            *link = Some(Link {
                client,
                broker: None,
            });
        }
        telemetry
    }

    /// Connects to `broker`, optionally switching topic.
    pub async fn connect(&self, broker: BrokerAddress, topic: Option<String>) {
        if let Some(topic) = topic.filter(|t| !t.is_empty()) {
            if let Ok(mut current) = self.topic.write() {
                *current = topic;
            }
        }

        // Fresh id per link so a stale session on the broker cannot kick the new one.
        let client_id = format!("{}-{}", self.client_id, &Uuid::new_v4().simple().to_string()[..8]);
        info!(broker = %broker.url(), client_id = %client_id, "Connecting to MQTT Broker");
        let client: Arc<dyn MqttPublisherClient> = Arc::new(MqttClient::new(&broker, &client_id));
        self.replace(Some(Link {
            client,
            broker: Some(broker),
        }))
        .await;
    }

    pub async fn disconnect(&self) {
        self.replace(None).await;
    }

    async fn replace(&self, next: Option<Link>) {
        let previous = match self.link.write() {
            Ok(mut link) => std::mem::replace(&mut *link, next),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            previous.client.shutdown().await;
        }
    }

    fn client(&self) -> Option<Arc<dyn MqttPublisherClient>> {
        self.link
            .read()
            .ok()
            .and_then(|link| link.as_ref().map(|l| l.client.clone()))
    }

    pub fn topic(&self) -> String {
        self.topic.read().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn status(&self) -> TelemetryStatus {
        let broker_url = self
            .link
            .read()
            .ok()
            .and_then(|link| link.as_ref().and_then(|l| l.broker.as_ref().map(|b| b.url())));
        TelemetryStatus {
            connected: self.is_available(),
            broker_url,
            topic: self.topic(),
        }
    }
}

#[async_trait]
impl SnapshotSink for MqttTelemetry {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn is_available(&self) -> bool {
        self.client().map(|c| c.is_connected()).unwrap_or(false)
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        let client = self
            .client()
            .ok_or_else(|| DomainError::DriverError("MQTT link not configured".into()))?;
        let payload = serde_json::to_vec(snapshot)
            .map_err(|e| DomainError::DriverError(format!("Failed to encode snapshot: {}", e)))?;

        client
            .publish_bytes(&self.topic(), &payload, QoS::AtMostOnce, false)
            .await
            .map_err(|e| {
                warn!("MQTT Publish Error: {}", e);
                DomainError::DriverError(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockMqttClient {
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        connected: AtomicBool,
        fail_publish: AtomicBool,
        shut_down: AtomicBool,
    }

    impl MockMqttClient {
        fn new(connected: bool) -> Self {
            Self {
                published: Arc::new(Mutex::new(Vec::new())),
                connected: AtomicBool::new(connected),
                fail_publish: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MqttPublisherClient for MockMqttClient {
        async fn publish_bytes(
            &self,
            topic: &str,
            payload: &[u8],
            _qos: QoS,
            _retain: bool,
        ) -> anyhow::Result<()> {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(anyhow!("Simulated publish failure"));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert("Machine_Speed".into(), json!(1200));
        snapshot.insert("Running".into(), json!(true));
        snapshot
    }

    #[tokio::test]
    async fn test_publish_sends_flat_json_to_topic() {
        let client = Arc::new(MockMqttClient::new(true));
        let telemetry = MqttTelemetry::with_client(client.clone(), "fuseflow/data");

        assert!(telemetry.is_available());
        telemetry.publish(&snapshot()).await.unwrap();

        let published = client.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "fuseflow/data");
        let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body, json!({"Machine_Speed": 1200, "Running": true}));
    }

    #[tokio::test]
    async fn test_unavailable_when_offline_or_unconfigured() {
        let telemetry = MqttTelemetry::new("gw", "t");
        assert!(!telemetry.is_available());
        assert!(telemetry.publish(&snapshot()).await.is_err());

        let offline = MqttTelemetry::with_client(Arc::new(MockMqttClient::new(false)), "t");
        assert!(!offline.is_available());
        assert!(!offline.status().connected);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let client = Arc::new(MockMqttClient::new(true));
        client.fail_publish.store(true, Ordering::SeqCst);
        let telemetry = MqttTelemetry::with_client(client, "t");

        let err = telemetry.publish(&snapshot()).await.unwrap_err();
        assert!(matches!(err, DomainError::DriverError(_)));
    }

    #[tokio::test]
    async fn test_disconnect_shuts_previous_client_down() {
        let client = Arc::new(MockMqttClient::new(true));
        let telemetry = MqttTelemetry::with_client(client.clone(), "t");

        telemetry.disconnect().await;

        assert!(client.shut_down.load(Ordering::SeqCst));
        assert!(!telemetry.is_available());
        assert_eq!(telemetry.status().broker_url, None);
    }
}
