use anyhow::{Result, anyhow};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Broker location parsed from `mqtt://host:port`, `tcp://host`, or a bare host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let without_scheme = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some((scheme, _)) => return Err(anyhow!("Unsupported broker scheme: {}", scheme)),
            None => trimmed,
        };
        let without_path = without_scheme.split('/').next().unwrap_or_default();

        let (host, port) = match without_path.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| anyhow!("Invalid broker port in {}", raw))?,
            ),
            None => (without_path, 1883),
        };
        if host.is_empty() {
            return Err(anyhow!("Broker URL {} has no host", raw));
        }
        Ok(Self::new(host, port))
    }

    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

#[async_trait::async_trait]
pub trait MqttPublisherClient: Send + Sync {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// Stops the client; further publishes fail.
    async fn shutdown(&self) {}
}

#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl MqttClient {
    pub fn new(broker: &BrokerAddress, client_id: &str) -> Self {
        let mut mqttoptions = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        mqttoptions.set_keep_alive(Duration::from_secs(20));
        mqttoptions.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = connected.clone();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let broker_url = broker.url();

        // Spawn a task to handle the event loop
        task::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => break,
                    polled = eventloop.poll() => match polled {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(broker = %broker_url, "MQTT Connected");
                            connected_clone.store(true, Ordering::Relaxed);
                        }
                        Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                            connected_clone.store(false, Ordering::Relaxed);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if connected_clone.swap(false, Ordering::Relaxed) {
                                warn!(broker = %broker_url, "MQTT client offline");
                            }
                            error!("MQTT Connection error: {:?}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
            connected_clone.store(false, Ordering::Relaxed);
        });

        Self {
            client,
            connected,
            cancel,
        }
    }

    pub async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.publish_bytes(topic, payload.as_bytes(), QoS::AtLeastOnce, retain)
            .await
    }
}

#[async_trait::async_trait]
impl MqttPublisherClient for MqttClient {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| anyhow!("Failed to publish MQTT message: {}", e))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) {
        let _ = self.client.disconnect().await;
        self.cancel.cancel();
        self.connected.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_address_forms() {
        assert_eq!(
            BrokerAddress::parse("mqtt://broker.hivemq.com").unwrap(),
            BrokerAddress::new("broker.hivemq.com", 1883)
        );
        assert_eq!(
            BrokerAddress::parse("tcp://10.0.0.5:1884").unwrap(),
            BrokerAddress::new("10.0.0.5", 1884)
        );
        assert_eq!(
            BrokerAddress::parse("localhost").unwrap(),
            BrokerAddress::new("localhost", 1883)
        );
        assert!(BrokerAddress::parse("ws://x").is_err());
        assert!(BrokerAddress::parse("mqtt://:1883").is_err());
        assert!(BrokerAddress::parse("mqtt://h:notaport").is_err());
    }

    #[test]
    fn test_url() {
        assert_eq!(BrokerAddress::new("h", 1).url(), "mqtt://h:1");
    }
}
