use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::DomainError;
use domain::coercion::coerce;
use domain::driver::{
    AcquisitionMode, ConnectionInfo, ConnectionState, DeviceDriver, Protocol, WriteOutcome,
};
use domain::tag::{CachedValue, RawSnapshot, SampleCache, TagTable};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{S7Address, S7Endpoint, S7Item, S7Transport, is_foreign};
use crate::config::S7Config;
use crate::drivers::{DriverTask, StateCell, with_timeout};

/// Poll-model S7 driver.
///
/// A driver-owned task reads every registered item each poll interval and
/// stores bare values in the cache. Tags whose address is not S7 syntax are
/// cached as `INVALID_FMT` and never registered.
pub struct S7Driver {
    transport: Arc<dyn S7Transport>,
    endpoint: RwLock<S7Endpoint>,
    poll_interval: Duration,
    timeout: Duration,
    state: StateCell,
    tags: Arc<RwLock<TagTable>>,
    cache: Arc<RwLock<SampleCache>>,
    /// Serializes session changes and writes
    session: Mutex<Option<DriverTask>>,
}

impl S7Driver {
    pub fn new(transport: Arc<dyn S7Transport>, config: &S7Config) -> Self {
        Self {
            transport,
            endpoint: RwLock::new(S7Endpoint {
                host: config.host.clone(),
                port: config.port,
                rack: config.rack,
                slot: config.slot,
            }),
            poll_interval: Duration::from_millis(config.poll_ms.max(10)),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            state: StateCell::default(),
            tags: Arc::new(RwLock::new(TagTable::new())),
            cache: Arc::new(RwLock::new(SampleCache::new())),
            session: Mutex::new(None),
        }
    }

    fn endpoint(&self) -> S7Endpoint {
        self.endpoint
            .read()
            .map(|e| e.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Accepts `host` or `host:port`.
    fn apply_target(&self, target: &str) {
        let mut parts = target.trim().splitn(2, ':');
        let host = parts.next().unwrap_or_default().to_string();
        let port = parts.next().and_then(|p| p.parse::<u16>().ok());

        if let Ok(mut endpoint) = self.endpoint.write() {
            if !host.is_empty() {
                endpoint.host = host;
            }
            if let Some(port) = port {
                endpoint.port = port;
            }
        }
    }

    /// Tags that parse as S7 addresses, in table order
    fn registrable_items(&self) -> Vec<S7Item> {
        let tags = match self.tags.read() {
            Ok(tags) => tags.clone(),
            Err(_) => return Vec::new(),
        };
        tags.into_iter()
            .filter(|(_, address)| !is_foreign(address))
            .filter_map(|(name, address)| {
                S7Address::parse(&address)
                    .ok()
                    .map(|address| S7Item { name, address })
            })
            .collect()
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut SampleCache) -> R) -> Option<R> {
        self.cache.write().ok().map(|mut cache| f(&mut cache))
    }

    /// Opens the session, registers items and starts polling.
    /// Caller holds the session lock.
    async fn open_session(&self) -> Result<DriverTask, DomainError> {
        let endpoint = self.endpoint();
        with_timeout(self.timeout, "S7 connect", self.transport.connect(&endpoint)).await?;

        let items = self.registrable_items();
        if let Err(e) =
            with_timeout(self.timeout, "S7 item registration", self.transport.register_items(&items))
                .await
        {
            let _ = self.transport.disconnect().await;
            return Err(e);
        }
        debug!(items = items.len(), "S7 items registered");

        Ok(self.spawn_poll_task())
    }

    fn spawn_poll_task(&self) -> DriverTask {
        let transport = self.transport.clone();
        let cache = self.cache.clone();
        let tags = self.tags.clone();
        let interval = self.poll_interval;
        let timeout = self.timeout;

        DriverTask::spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match with_timeout(timeout, "S7 read", transport.read_all()).await {
                            Ok(values) => {
                                // A read racing `remove_tag` must not resurrect the entry.
                                if let (Ok(mut cache), Ok(known)) = (cache.write(), tags.read()) {
                                    for (name, value) in values {
                                        if known.contains_key(&name) {
                                            cache.insert(&name, CachedValue::Value(value));
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!("Error reading S7 tags: {}", e),
                        }
                    }
                }
            }
            debug!("S7 poll task stopped");
        })
    }

    async fn close_session(&self, task: Option<DriverTask>) {
        if let Some(task) = task {
            task.stop().await;
        }
        if let Err(e) = with_timeout(self.timeout, "S7 disconnect", self.transport.disconnect()).await
        {
            warn!("S7 disconnect reported an error: {}", e);
        }
    }
}

#[async_trait]
impl DeviceDriver for S7Driver {
    fn protocol(&self) -> Protocol {
        Protocol::S7
    }

    fn acquisition(&self) -> AcquisitionMode {
        AcquisitionMode::Poll
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self, target: Option<&str>) -> Result<(), DomainError> {
        let mut session = self.session.lock().await;

        if session.is_some() {
            self.state.set(ConnectionState::Disconnecting);
            self.close_session(session.take()).await;
        }

        if let Some(target) = target {
            self.apply_target(target);
        }
        let endpoint = self.endpoint();
        info!(
            host = %endpoint.host,
            rack = endpoint.rack,
            slot = endpoint.slot,
            "Connecting to S7 PLC"
        );
        self.state.set(ConnectionState::Connecting);

        match self.open_session().await {
            Ok(task) => {
                *session = Some(task);
                self.state.set(ConnectionState::Connected);
                info!(host = %endpoint.host, "S7 connected");
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                error!(host = %endpoint.host, "S7 connection failed: {}", e);
                Err(match e {
                    DomainError::ConnectionFailure(_) => e,
                    other => DomainError::ConnectionFailure(other.to_string()),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        let mut session = self.session.lock().await;
        if session.is_none() && !self.state.get().is_connected() {
            self.state.set(ConnectionState::Disconnected);
            return Ok(());
        }

        self.state.set(ConnectionState::Disconnecting);
        self.close_session(session.take()).await;
        self.state.set(ConnectionState::Disconnected);
        info!("S7 disconnected");
        Ok(())
    }

    async fn update_tag_set(&self, tags: &TagTable) -> Result<(), DomainError> {
        if let Ok(mut known) = self.tags.write() {
            known.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        self.with_cache(|cache| {
            for (name, address) in tags {
                let valid = !is_foreign(address) && S7Address::parse(address).is_ok();
                match (valid, cache.get(name)) {
                    (false, _) => cache.insert(name, CachedValue::InvalidFormat),
                    (true, Some(CachedValue::InvalidFormat)) => {
                        cache.insert(name, CachedValue::Pending)
                    }
                    (true, _) => cache.insert_if_absent(name, CachedValue::Pending),
                }
            }
        });

        // Items can only be registered on a fresh session.
        let mut session = self.session.lock().await;
        if session.is_none() {
            return Ok(());
        }

        debug!(tags = tags.len(), "Re-registering S7 items");
        self.state.set(ConnectionState::Disconnecting);
        self.close_session(session.take()).await;
        self.state.set(ConnectionState::Connecting);

        match self.open_session().await {
            Ok(task) => {
                *session = Some(task);
                self.state.set(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                error!("S7 reconnect after tag update failed: {}", e);
                Err(e)
            }
        }
    }

    async fn remove_tag(&self, name: &str) -> Result<(), DomainError> {
        let existed = self
            .tags
            .write()
            .map(|mut tags| tags.remove(name).is_some())
            .unwrap_or(false);
        self.with_cache(|cache| cache.remove(name));

        let session = self.session.lock().await;
        if existed && session.is_some() {
            if let Err(e) = self.transport.remove_item(name).await {
                warn!(tag = %name, "Failed to release S7 item: {}", e);
            }
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
        let parsed = S7Address::parse(&address)?;
        let wire_type = parsed.kind.wire_type();
        let value = coerce(raw, wire_type)?;

        let item = S7Item {
            name: name.to_string(),
            address: parsed,
        };
        with_timeout(self.timeout, "S7 write", self.transport.write_item(&item, &value)).await?;
        drop(session);

        info!(tag = %name, value = ?value, "Wrote S7 item");
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
        let tag_count = self.tags.read().map(|t| t.len()).unwrap_or_default();
        let state = self.state.get();

        let mut details = Map::new();
        details.insert("ip".into(), json!(endpoint.host));
        details.insert("port".into(), json!(endpoint.port));
        details.insert("rack".into(), json!(endpoint.rack));
        details.insert("slot".into(), json!(endpoint.slot));
        details.insert(
            "pollIntervalMs".into(),
            json!(self.poll_interval.as_millis() as u64),
        );

        ConnectionInfo {
            protocol: Protocol::S7,
            target: Some(endpoint.host),
            connected: state.is_connected(),
            state,
            acquisition: AcquisitionMode::Poll,
            tag_count,
            details,
        }
    }
}
