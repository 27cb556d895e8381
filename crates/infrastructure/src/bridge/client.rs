use std::time::Duration;

use async_trait::async_trait;
use domain::DomainError;
use domain::bridge::{BridgeVariable, FlowBridge};
use serde_json::Value;
use tracing::{error, info};

use super::{FlowSettings, build_flow, extract_variables};
use crate::config::BridgeConfig;

/// Node-RED admin API client.
pub struct NodeRedClient {
    http: reqwest::Client,
    base_url: String,
    settings: FlowSettings,
}

impl NodeRedClient {
    pub fn new(config: &BridgeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            settings: FlowSettings {
                plc_address: config.plc_address.clone(),
                broker_host: config.broker_host.clone(),
                broker_port: config.broker_port,
                topic: config.topic.clone(),
            },
        }
    }

    fn flows_url(&self) -> String {
        format!("{}/flows", self.base_url)
    }

    fn unavailable(e: impl std::fmt::Display) -> DomainError {
        DomainError::BridgeUnavailable(e.to_string())
    }
}

#[async_trait]
impl FlowBridge for NodeRedClient {
    async fn deploy(
        &self,
        variables: &[BridgeVariable],
        plc_address: &str,
    ) -> Result<(), DomainError> {
        let mut settings = self.settings.clone();
        if !plc_address.is_empty() {
            settings.plc_address = plc_address.to_string();
        }
        let nodes = build_flow(variables, &settings);

        let response = self
            .http
            .post(self.flows_url())
            .header("Node-RED-Deployment-Type", "nodes")
            .json(&nodes)
            .send()
            .await
            .map_err(|e| {
                error!("Node-RED connection error: {}", e);
                Self::unavailable(format!("Could not connect to Node-RED: {}", e))
            })?;

        if response.status().is_success() {
            info!(variables = variables.len(), "Node-RED flow deployed");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Node-RED deployment failed: {}", body);
            Err(DomainError::DriverError(format!(
                "Node-RED rejected flow ({})",
                status
            )))
        }
    }

    async fn export(&self) -> Result<Vec<BridgeVariable>, DomainError> {
        let response = self
            .http
            .get(self.flows_url())
            .send()
            .await
            .map_err(Self::unavailable)?;
        if !response.status().is_success() {
            return Err(DomainError::BridgeUnavailable(format!(
                "Failed to fetch flows from Node-RED ({})",
                response.status()
            )));
        }

        let flows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| DomainError::DriverError(format!("Unexpected flow payload: {}", e)))?;
        Ok(extract_variables(&flows))
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let response = self
            .http
            .get(self.flows_url())
            .send()
            .await
            .map_err(Self::unavailable)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DomainError::BridgeUnavailable(format!(
                "Node-RED answered {}",
                response.status()
            )))
        }
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}
