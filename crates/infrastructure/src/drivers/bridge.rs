//! Flow-engine bridge driver (passive).

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::DomainError;
use domain::bridge::FlowBridge;
use domain::driver::{
    AcquisitionMode, ConnectionInfo, ConnectionState, DeviceDriver, Protocol, WriteOutcome,
};
use domain::tag::{RawSnapshot, TagTable};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bridge::s7_variables;
use crate::config::BridgeConfig;
use crate::drivers::StateCell;

/// Hands the PLC session to the flow engine.
///
/// Connecting deploys a generated flow for the S7 subset of the tag table;
/// tag changes redeploy. The gateway holds no live values in this mode and
/// writes are refused.
pub struct BridgeDriver {
    bridge: Arc<dyn FlowBridge>,
    plc_address: RwLock<String>,
    state: StateCell,
    tags: RwLock<TagTable>,
    session: Mutex<()>,
}

impl BridgeDriver {
    pub fn new(bridge: Arc<dyn FlowBridge>, config: &BridgeConfig) -> Self {
        Self {
            bridge,
            plc_address: RwLock::new(config.plc_address.clone()),
            state: StateCell::default(),
            tags: RwLock::new(TagTable::new()),
            session: Mutex::new(()),
        }
    }

    fn plc_address(&self) -> String {
        self.plc_address
            .read()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    async fn deploy_current(&self) -> Result<(), DomainError> {
        let variables = {
            let tags = self.tags.read().map(|t| t.clone()).unwrap_or_default();
            s7_variables(&tags)
        };
        if variables.is_empty() {
            warn!("No S7 tags to deploy to the flow engine");
            return Ok(());
        }
        self.bridge.deploy(&variables, &self.plc_address()).await
    }
}

#[async_trait]
impl DeviceDriver for BridgeDriver {
    fn protocol(&self) -> Protocol {
        Protocol::FlowBridge
    }

    fn acquisition(&self) -> AcquisitionMode {
        AcquisitionMode::Passive
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self, target: Option<&str>) -> Result<(), DomainError> {
        let _session = self.session.lock().await;

        if let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) {
            let host = target.split("://").last().unwrap_or(target);
            let host = host.split(':').next().unwrap_or(host);
            if let Ok(mut address) = self.plc_address.write() {
                *address = host.to_string();
            }
        }

        self.state.set(ConnectionState::Connecting);
        info!(url = %self.bridge.url(), plc = %self.plc_address(), "Handing PLC to flow engine");

        let result = match self.bridge.ping().await {
            Ok(()) => self.deploy_current().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.state.set(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                warn!("Flow bridge connect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        let _session = self.session.lock().await;
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn update_tag_set(&self, tags: &TagTable) -> Result<(), DomainError> {
        if let Ok(mut known) = self.tags.write() {
            known.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let _session = self.session.lock().await;
        if self.state.get().is_connected() {
            self.deploy_current().await?;
        }
        Ok(())
    }

    async fn remove_tag(&self, name: &str) -> Result<(), DomainError> {
        if let Ok(mut tags) = self.tags.write() {
            tags.remove(name);
        }
        Ok(())
    }

    async fn write(&self, _name: &str, _raw: &Value) -> Result<WriteOutcome, DomainError> {
        if !self.state.get().is_connected() {
            return Err(DomainError::NotConnected);
        }
        Err(DomainError::DriverError(
            "The Node-RED bridge does not accept writes".to_string(),
        ))
    }

    fn snapshot(&self) -> RawSnapshot {
        Vec::new()
    }

    fn describe_connection(&self) -> ConnectionInfo {
        let state = self.state.get();
        let tag_count = self.tags.read().map(|t| t.len()).unwrap_or_default();

        let mut details = Map::new();
        details.insert("url".into(), json!(self.bridge.url()));
        details.insert("plcAddress".into(), json!(self.plc_address()));

        ConnectionInfo {
            protocol: Protocol::FlowBridge,
            target: Some(self.bridge.url().to_string()),
            connected: state.is_connected(),
            state,
            acquisition: AcquisitionMode::Passive,
            tag_count,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::bridge::BridgeVariable;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingBridge {
        reachable: bool,
        deployed: StdMutex<Vec<(Vec<BridgeVariable>, String)>>,
    }

    #[async_trait]
    impl FlowBridge for RecordingBridge {
        async fn deploy(
            &self,
            variables: &[BridgeVariable],
            plc_address: &str,
        ) -> Result<(), DomainError> {
            self.deployed
                .lock()
                .unwrap()
                .push((variables.to_vec(), plc_address.to_string()));
            Ok(())
        }

        async fn export(&self) -> Result<Vec<BridgeVariable>, DomainError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), DomainError> {
            if self.reachable {
                Ok(())
            } else {
                Err(DomainError::BridgeUnavailable("connection refused".into()))
            }
        }

        fn url(&self) -> &str {
            "http://flows:1881"
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            url: "http://flows:1881".into(),
            plc_address: "10.0.0.1".into(),
            broker_host: "localhost".into(),
            broker_port: 1883,
            topic: "t".into(),
        }
    }

    fn tags() -> TagTable {
        [
            ("Speed".to_string(), "DB1,INT0".to_string()),
            ("Ua".to_string(), "ns=2;s=Ua".to_string()),
        ]
        .into()
    }

    #[tokio::test]
    async fn test_connect_deploys_s7_subset() {
        let bridge = Arc::new(RecordingBridge {
            reachable: true,
            ..Default::default()
        });
        let driver = BridgeDriver::new(bridge.clone(), &config());
        driver.update_tag_set(&tags()).await.unwrap();
        assert!(bridge.deployed.lock().unwrap().is_empty());

        driver.connect(Some("s7://10.0.0.42:102")).await.unwrap();
        assert!(driver.is_connected());

        let deployed = bridge.deployed.lock().unwrap();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].0, vec![BridgeVariable::new("Speed", "DB1,INT0")]);
        assert_eq!(deployed[0].1, "10.0.0.42");
    }

    #[tokio::test]
    async fn test_unreachable_bridge() {
        let driver = BridgeDriver::new(Arc::new(RecordingBridge::default()), &config());
        let err = driver.connect(None).await.unwrap_err();
        assert!(matches!(err, DomainError::BridgeUnavailable(_)));
        assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_tag_update_redeploys_and_writes_are_refused() {
        let bridge = Arc::new(RecordingBridge {
            reachable: true,
            ..Default::default()
        });
        let driver = BridgeDriver::new(bridge.clone(), &config());
        driver.update_tag_set(&tags()).await.unwrap();
        driver.connect(None).await.unwrap();
        driver
            .update_tag_set(&[("Run".to_string(), "DB1,X8.0".to_string())].into())
            .await
            .unwrap();
        assert_eq!(bridge.deployed.lock().unwrap().len(), 2);

        assert!(matches!(
            driver.write("Speed", &json!(1)).await,
            Err(DomainError::DriverError(_))
        ));
        assert!(driver.snapshot().is_empty());
        assert_eq!(driver.acquisition(), AcquisitionMode::Passive);
    }
}
