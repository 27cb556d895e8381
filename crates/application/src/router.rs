use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use domain::DomainError;
use domain::driver::{ConnectionInfo, DeviceDriver, Protocol};
use domain::tag::TagTable;
use tokio::sync::RwLock as SwitchLock;
use tracing::{error, info, warn};

const OPCUA_SCHEME: &str = "opc.tcp://";
const OPCUA_DEFAULT_PORT: u16 = 4840;

/// Shapes a caller-supplied target for the selected protocol.
///
/// S7 wants a bare host; OPC UA wants a full endpoint URL.
pub fn shape_target(protocol: Protocol, target: &str) -> String {
    let target = target.trim();
    match protocol {
        Protocol::S7 | Protocol::FlowBridge => {
            let host = target.split_once("://").map_or(target, |(_, rest)| rest);
            let host = host.split('/').next().unwrap_or(host);
            host.split(':').next().unwrap_or(host).to_string()
        }
        Protocol::OpcUa => {
            if target.contains("://") {
                target.to_string()
            } else if target.contains(':') {
                format!("{}{}", OPCUA_SCHEME, target)
            } else {
                format!("{}{}:{}", OPCUA_SCHEME, target, OPCUA_DEFAULT_PORT)
            }
        }
    }
}

/// Holds one driver per protocol and exactly one active selection.
pub struct DriverRouter {
    drivers: HashMap<Protocol, Arc<dyn DeviceDriver>>,
    active: RwLock<Arc<dyn DeviceDriver>>,
    /// Held exclusively for a whole switch; tag pushes share it so they
    /// land on the driver that is active once the switch is over.
    switching: SwitchLock<()>,
    disconnect_timeout: Duration,
}

impl DriverRouter {
    pub fn new(
        drivers: Vec<Arc<dyn DeviceDriver>>,
        initial: Protocol,
        disconnect_timeout: Duration,
    ) -> Result<Self, DomainError> {
        let drivers: HashMap<_, _> = drivers.into_iter().map(|d| (d.protocol(), d)).collect();
        let selected = drivers.get(&initial).cloned().ok_or_else(|| {
            DomainError::InvalidConfiguration(format!("No driver registered for {}", initial))
        })?;
        Ok(Self {
            drivers,
            active: RwLock::new(selected),
            switching: SwitchLock::new(()),
            disconnect_timeout,
        })
    }

    /// The selected driver.
    pub fn active(&self) -> Arc<dyn DeviceDriver> {
        match self.active.read() {
            Ok(active) => active.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn active_protocol(&self) -> Protocol {
        self.active().protocol()
    }

    pub fn driver(&self, protocol: Protocol) -> Option<Arc<dyn DeviceDriver>> {
        self.drivers.get(&protocol).cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_connected()
    }

    pub fn is_switching(&self) -> bool {
        self.switching.try_read().is_err()
    }

    /// Connection info for every driver, in protocol order.
    pub fn describe_all(&self) -> Vec<ConnectionInfo> {
        Protocol::ALL
            .iter()
            .filter_map(|p| self.drivers.get(p))
            .map(|d| d.describe_connection())
            .collect()
    }

    /// Disconnects the current driver, selects `requested`, pushes `tags` and
    /// connects. The selection sticks even when connect fails.
    pub async fn switch_protocol(
        &self,
        requested: &str,
        target: Option<&str>,
        tags: &TagTable,
    ) -> Result<Protocol, DomainError> {
        let _switch = self
            .switching
            .try_write()
            .map_err(|_| DomainError::SwitchInProgress)?;

        let previous = self.active();
        if previous.connection_state().is_connected()
            || previous.connection_state().is_transitioning()
        {
            self.disconnect_bounded(&previous).await;
        }

        let protocol = Protocol::from_request(requested);
        let next = self.driver(protocol).ok_or_else(|| {
            DomainError::InvalidConfiguration(format!("No driver registered for {}", protocol))
        })?;
        match self.active.write() {
            Ok(mut active) => *active = next.clone(),
            Err(poisoned) => *poisoned.into_inner() = next.clone(),
        }
        info!(from = %previous.protocol(), to = %protocol, "Switched driver");

        if let Err(e) = next.update_tag_set(tags).await {
            warn!(protocol = %protocol, "Tag sync before connect failed: {}", e);
        }

        let shaped = target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| shape_target(protocol, t));
        match next.connect(shaped.as_deref()).await {
            Ok(()) => Ok(protocol),
            Err(e) => {
                error!(protocol = %protocol, "Connect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Runs the disconnect on its own task; when it outlives the timeout the
    /// switch proceeds and the driver finishes tearing down in the background.
    async fn disconnect_bounded(&self, driver: &Arc<dyn DeviceDriver>) {
        let protocol = driver.protocol();
        let draining = driver.clone();
        let handle = tokio::spawn(async move { draining.disconnect().await });

        match tokio::time::timeout(self.disconnect_timeout, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(protocol = %protocol, "Disconnect failed: {}", e),
            Ok(Err(e)) => error!(protocol = %protocol, "Disconnect task failed: {}", e),
            Err(_) => warn!(
                protocol = %protocol,
                timeout_ms = self.disconnect_timeout.as_millis() as u64,
                "Disconnect timed out, proceeding with switch"
            ),
        }
    }

    /// Pushes tags into the active driver, waiting out any switch in flight.
    pub async fn sync_tags(&self, tags: &TagTable) -> Result<(), DomainError> {
        let _settled = self.switching.read().await;
        self.active().update_tag_set(tags).await
    }

    /// Drops `name` from every driver so a later switch does not resurrect it.
    pub async fn remove_tag(&self, name: &str) {
        let _settled = self.switching.read().await;
        for driver in self.drivers.values() {
            if let Err(e) = driver.remove_tag(name).await {
                warn!(protocol = %driver.protocol(), tag = %name, "Remove failed: {}", e);
            }
        }
    }

    pub async fn shutdown(&self) {
        let driver = self.active();
        if driver.is_connected() {
            self.disconnect_bounded(&driver).await;
        }
    }
}
