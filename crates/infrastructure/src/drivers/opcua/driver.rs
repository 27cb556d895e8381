use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::DomainError;
use domain::coercion::{WireType, coerce};
use domain::driver::{
    AcquisitionMode, ConnectionInfo, ConnectionState, DeviceDriver, Protocol, WriteOutcome,
};
use domain::tag::{CachedValue, RawSnapshot, Sample, SampleCache, TagQuality, TagTable};
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use super::{DataChange, NodeId, OpcUaTransport, SubscriptionParams};
use crate::config::OpcUaConfig;
use crate::drivers::{DriverTask, StateCell, with_timeout};

const NOTIFICATION_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct MonitoredItem {
    item_id: u32,
    node: NodeId,
}

struct Session {
    subscription_id: u32,
    pump: DriverTask,
}

type MonitoredMap = Arc<RwLock<HashMap<String, MonitoredItem>>>;

/// Push-model OPC UA driver.
///
/// One subscription per session; each tag with a node-id address becomes a
/// monitored item. Data changes arrive on a channel and a driver-owned task
/// drains them into the sample cache.
pub struct OpcUaDriver {
    transport: Arc<dyn OpcUaTransport>,
    endpoint: RwLock<String>,
    params: SubscriptionParams,
    timeout: Duration,
    state: StateCell,
    tags: RwLock<TagTable>,
    cache: Arc<RwLock<SampleCache>>,
    monitored: MonitoredMap,
    session: Mutex<Option<Session>>,
}

impl OpcUaDriver {
    pub fn new(transport: Arc<dyn OpcUaTransport>, config: &OpcUaConfig) -> Self {
        Self {
            transport,
            endpoint: RwLock::new(config.endpoint.clone()),
            params: SubscriptionParams {
                publishing_interval_ms: config.publishing_ms,
                sampling_interval_ms: config.sampling_ms,
                queue_size: config.queue_size,
            },
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            state: StateCell::default(),
            tags: RwLock::new(TagTable::new()),
            cache: Arc::new(RwLock::new(SampleCache::new())),
            monitored: Arc::new(RwLock::new(HashMap::new())),
            session: Mutex::new(None),
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn monitored_item(&self, name: &str) -> Option<MonitoredItem> {
        self.monitored.read().ok()?.get(name).cloned()
    }

    fn spawn_pump(
        &self,
        mut notifications: mpsc::Receiver<DataChange>,
    ) -> DriverTask {
        let cache = self.cache.clone();
        let monitored = self.monitored.clone();

        DriverTask::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = notifications.recv() => {
                        let Some(change) = change else { break };
                        let live = monitored
                            .read()
                            .map(|m| m.contains_key(&change.handle))
                            .unwrap_or(false);
                        if !live {
                            // Late notification for an item already torn down.
                            continue;
                        }
                        let sample = Sample::new(
                            change.value,
                            TagQuality::from_status_name(&change.status),
                            change.source_timestamp.unwrap_or_else(chrono::Utc::now),
                        );
                        if let Ok(mut cache) = cache.write() {
                            cache.insert(&change.handle, CachedValue::Sample(sample));
                        }
                    }
                }
            }
            debug!("OPC UA notification pump stopped");
        })
    }

    /// Creates monitored items for `tags` that are not already monitored at
    /// the same node. Individual failures are logged and skipped.
    async fn monitor_tags(&self, subscription_id: u32, tags: &TagTable) {
        for (name, address) in tags {
            let node = match NodeId::parse(address) {
                Ok(node) => node,
                Err(_) => {
                    self.release(subscription_id, name).await;
                    continue;
                }
            };

            match self.monitored_item(name) {
                Some(existing) if existing.node == node => continue,
                Some(_) => self.release(subscription_id, name).await,
                None => {}
            }

            match with_timeout(
                self.timeout,
                "OPC UA monitor",
                self.transport.monitor(subscription_id, &node, name),
            )
            .await
            {
                Ok(item_id) => {
                    if let Ok(mut monitored) = self.monitored.write() {
                        monitored.insert(name.clone(), MonitoredItem { item_id, node });
                    }
                    debug!(tag = %name, address = %address, "Monitoring");
                }
                Err(e) => error!(tag = %name, "Failed to monitor: {}", e),
            }
        }
    }

    async fn release(&self, subscription_id: u32, name: &str) {
        let removed = self
            .monitored
            .write()
            .ok()
            .and_then(|mut monitored| monitored.remove(name));
        if let Some(item) = removed {
            if let Err(e) = self.transport.unmonitor(subscription_id, item.item_id).await {
                warn!(tag = %name, "Failed to terminate monitored item: {}", e);
            }
        }
    }

    async fn close_session(&self, session: Session) {
        session.pump.stop().await;
        if let Err(e) = self
            .transport
            .delete_subscription(session.subscription_id)
            .await
        {
            warn!("Failed to delete subscription: {}", e);
        }
        if let Err(e) =
            with_timeout(self.timeout, "OPC UA disconnect", self.transport.disconnect()).await
        {
            warn!("Error during disconnect: {}", e);
        }
        if let Ok(mut monitored) = self.monitored.write() {
            monitored.clear();
        }
    }

    async fn open_session(&self, endpoint: &str) -> Result<Session, DomainError> {
        with_timeout(self.timeout, "OPC UA connect", self.transport.connect(endpoint)).await?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let subscription_id = match with_timeout(
            self.timeout,
            "OPC UA create subscription",
            self.transport.create_subscription(self.params, tx),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                let _ = self.transport.disconnect().await;
                return Err(e);
            }
        };
        debug!(subscription_id, "Subscription created");

        Ok(Session {
            subscription_id,
            pump: self.spawn_pump(rx),
        })
    }
}

#[async_trait]
impl DeviceDriver for OpcUaDriver {
    fn protocol(&self) -> Protocol {
        Protocol::OpcUa
    }

    fn acquisition(&self) -> AcquisitionMode {
        AcquisitionMode::Push
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self, target: Option<&str>) -> Result<(), DomainError> {
        let mut session = self.session.lock().await;

        if let Some(old) = session.take() {
            self.state.set(ConnectionState::Disconnecting);
            self.close_session(old).await;
        }

        if let Some(target) = target.filter(|t| !t.trim().is_empty()) {
            if let Ok(mut endpoint) = self.endpoint.write() {
                *endpoint = target.trim().to_string();
            }
        }
        let endpoint = self.endpoint();
        info!(endpoint = %endpoint, "Connecting to OPC UA server");
        self.state.set(ConnectionState::Connecting);

        match self.open_session(&endpoint).await {
            Ok(opened) => {
                let subscription_id = opened.subscription_id;
                *session = Some(opened);
                let tags = self.tags.read().map(|t| t.clone()).unwrap_or_default();
                self.monitor_tags(subscription_id, &tags).await;
                self.state.set(ConnectionState::Connected);
                info!(endpoint = %endpoint, "OPC UA connected");
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                error!(endpoint = %endpoint, "OPC UA connection failed: {}", e);
                Err(match e {
                    DomainError::ConnectionFailure(_) => e,
                    other => DomainError::ConnectionFailure(other.to_string()),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        let mut session = self.session.lock().await;
        let Some(open) = session.take() else {
            self.state.set(ConnectionState::Disconnected);
            return Ok(());
        };

        info!("Disconnecting from OPC UA server");
        self.state.set(ConnectionState::Disconnecting);
        self.close_session(open).await;
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn update_tag_set(&self, tags: &TagTable) -> Result<(), DomainError> {
        if let Ok(mut known) = self.tags.write() {
            known.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if let Ok(mut cache) = self.cache.write() {
            for (name, address) in tags {
                match (NodeId::parse(address).is_ok(), cache.get(name)) {
                    (false, _) => cache.insert(name, CachedValue::InvalidFormat),
                    (true, Some(CachedValue::InvalidFormat)) => {
                        cache.insert(name, CachedValue::Pending)
                    }
                    (true, _) => cache.insert_if_absent(name, CachedValue::Pending),
                }
            }
        }

        // Existing monitored items are left alone; only new or moved tags subscribe.
        let session = self.session.lock().await;
        if let Some(open) = session.as_ref() {
            self.monitor_tags(open.subscription_id, tags).await;
        }
        Ok(())
    }

    async fn remove_tag(&self, name: &str) -> Result<(), DomainError> {
        if let Ok(mut tags) = self.tags.write() {
            tags.remove(name);
        }

        let session = self.session.lock().await;
        match session.as_ref() {
            Some(open) => self.release(open.subscription_id, name).await,
            None => {
                if let Ok(mut monitored) = self.monitored.write() {
                    monitored.remove(name);
                }
            }
        }

        if let Ok(mut cache) = self.cache.write() {
            cache.remove(name);
        }
        Ok(())
    }

    async fn write(&self, name: &str, raw: &Value) -> Result<WriteOutcome, DomainError> {
        let session = self.session.lock().await;
        if session.is_none() || !self.state.get().is_connected() {
            return Err(DomainError::NotConnected);
        }

        let address = self
            .tags
            .read()
            .ok()
            .and_then(|tags| tags.get(name).cloned())
            .ok_or_else(|| DomainError::UnknownTag(name.to_string()))?;
        let node = NodeId::parse(&address)?;

        // The node's current value tells us its wire type.
        let current = with_timeout(self.timeout, "OPC UA read", self.transport.read(&node)).await?;
        let wire_type = WireType::from_opcua_id(current.type_id).ok_or_else(|| {
            DomainError::InvalidValue(format!(
                "Tag \"{}\" has unsupported datatype id {}",
                name, current.type_id
            ))
        })?;
        let value = coerce(raw, wire_type)?;
        debug!(tag = %name, wire_type = %wire_type, "Writing");

        with_timeout(
            self.timeout,
            "OPC UA write",
            self.transport.write(&node, current.type_id, &value),
        )
        .await?;
        drop(session);

        info!(tag = %name, value = ?value, "Successfully wrote value");
        Ok(WriteOutcome {
            tag: name.to_string(),
            value: value.to_json(),
            wire_type,
        })
    }

    fn snapshot(&self) -> RawSnapshot {
        self.cache
            .read()
            .map(|cache| cache.snapshot())
            .unwrap_or_default()
    }

    fn describe_connection(&self) -> ConnectionInfo {
        let endpoint = self.endpoint();
        let state = self.state.get();
        let tags: Vec<String> = self
            .tags
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        let monitored = self.monitored.read().map(|m| m.len()).unwrap_or_default();

        let mut details = Map::new();
        details.insert("endpointUrl".into(), json!(endpoint));
        details.insert("session".into(), json!(state.is_connected()));
        details.insert("subscription".into(), json!(state.is_connected()));
        details.insert("monitoredItemsCount".into(), json!(monitored));
        details.insert("tags".into(), json!(tags));

        ConnectionInfo {
            protocol: Protocol::OpcUa,
            target: Some(endpoint),
            connected: state.is_connected(),
            state,
            acquisition: AcquisitionMode::Push,
            tag_count: tags.len(),
            details,
        }
    }
}
