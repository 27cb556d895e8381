pub mod bridge;
pub mod opcua;
pub mod s7;
mod waveform;

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use domain::DomainError;
use domain::bridge::FlowBridge;
use domain::driver::{ConnectionState, DeviceDriver, Protocol};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, OpcUaConfig, S7Config};
pub use bridge::BridgeDriver;
pub use self::opcua::{AsyncOpcUaTransport, OpcUaDriver, OpcUaTransport, SimulatedOpcUa};
pub use self::s7::{IsoTcpS7, S7Driver, S7Transport, SimulatedS7};

/// Shared, lock-protected connection state. Reads never block on I/O.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<RwLock<ConnectionState>>);

impl StateCell {
    pub fn get(&self) -> ConnectionState {
        self.0.read().map(|s| *s).unwrap_or_default()
    }

    pub fn set(&self, state: ConnectionState) {
        if let Ok(mut guard) = self.0.write() {
            *guard = state;
        }
    }
}

/// A driver-owned background task (poll loop, notification pump).
pub(crate) struct DriverTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DriverTask {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f(cancel.clone()));
        Self { cancel, handle }
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Driver task panicked: {}", e);
            }
        }
    }
}

/// Runs a transport call under a timeout, mapping expiry to `err`.
pub(crate) async fn with_timeout<T, F>(
    timeout: Duration,
    what: &str,
    fut: F,
) -> Result<T, DomainError>
where
    F: Future<Output = Result<T, DomainError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::DriverError(format!(
            "{} timed out after {} ms",
            what,
            timeout.as_millis()
        ))),
    }
}

/// Factory for creating protocol drivers
pub struct DriverFactory;

impl DriverFactory {
    /// ISO-on-TCP client, or the waveform simulator when `s7.simulated` is set.
    pub fn s7_transport(config: &S7Config) -> Arc<dyn S7Transport> {
        if config.simulated {
            tracing::info!("S7 transport: simulator");
            Arc::new(SimulatedS7::new().with_waveform(20.0, 80.0))
        } else {
            Arc::new(IsoTcpS7::new())
        }
    }

    /// `async-opcua` client session, or the demo server when `opcua.simulated` is set.
    pub fn opcua_transport(config: &OpcUaConfig) -> Arc<dyn OpcUaTransport> {
        if config.simulated {
            tracing::info!("OPC UA transport: simulator");
            Arc::new(SimulatedOpcUa::new().with_demo_nodes())
        } else {
            Arc::new(AsyncOpcUaTransport::new(config))
        }
    }

    /// Creates the driver for `protocol` over the given transports.
    pub fn create_driver(
        protocol: Protocol,
        config: &GatewayConfig,
        s7: Arc<dyn S7Transport>,
        opcua: Arc<dyn OpcUaTransport>,
        bridge: Arc<dyn FlowBridge>,
    ) -> Arc<dyn DeviceDriver> {
        match protocol {
            Protocol::S7 => Arc::new(S7Driver::new(s7, &config.s7)),
            Protocol::OpcUa => Arc::new(OpcUaDriver::new(opcua, &config.opcua)),
            Protocol::FlowBridge => Arc::new(BridgeDriver::new(bridge, &config.bridge)),
        }
    }

    /// One driver per protocol.
    pub fn create_all(
        config: &GatewayConfig,
        s7: Arc<dyn S7Transport>,
        opcua: Arc<dyn OpcUaTransport>,
        bridge: Arc<dyn FlowBridge>,
    ) -> Vec<Arc<dyn DeviceDriver>> {
        Protocol::ALL
            .iter()
            .map(|p| {
                Self::create_driver(*p, config, s7.clone(), opcua.clone(), bridge.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NodeRedClient;

    #[tokio::test]
    async fn test_create_all_covers_every_protocol() {
        let config = GatewayConfig::default_settings().unwrap();
        let drivers = DriverFactory::create_all(
            &config,
            Arc::new(SimulatedS7::new()),
            Arc::new(SimulatedOpcUa::new()),
            Arc::new(NodeRedClient::new(&config.bridge)),
        );

        let protocols: Vec<_> = drivers.iter().map(|d| d.protocol()).collect();
        assert_eq!(protocols, Protocol::ALL.to_vec());
        assert!(drivers.iter().all(|d| !d.is_connected()));
    }

    #[tokio::test]
    async fn test_simulated_flags_pick_simulators() {
        let mut config = GatewayConfig::default_settings().unwrap();
        config.s7.simulated = true;
        config.opcua.simulated = true;

        // The demo server answers without any network.
        let server = DriverFactory::opcua_transport(&config.opcua);
        server.connect(&config.opcua.endpoint).await.unwrap();
        server.disconnect().await.unwrap();

        let plc = DriverFactory::s7_transport(&config.s7);
        plc.connect(&self::s7::S7Endpoint {
            host: config.s7.host.clone(),
            port: config.s7.port,
            rack: config.s7.rack,
            slot: config.s7.slot,
        })
        .await
        .unwrap();
        plc.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_real_transports_need_a_session() {
        let config = GatewayConfig::default_settings().unwrap();

        let plc = DriverFactory::s7_transport(&config.s7);
        assert_eq!(plc.read_all().await.unwrap_err(), DomainError::NotConnected);
        let server = DriverFactory::opcua_transport(&config.opcua);
        let node = self::opcua::NodeId::string(2, "Speed");
        assert_eq!(server.read(&node).await.unwrap_err(), DomainError::NotConnected);
    }

    #[tokio::test]
    async fn test_driver_task_stop_joins() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let task = DriverTask::spawn(|cancel| async move {
            cancel.cancelled().await;
            let _ = tx.send(()).await;
        });
        task.stop().await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), "read", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DomainError::DriverError(_))));
    }
}
