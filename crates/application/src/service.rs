use std::sync::Arc;

use domain::audit::{AuditAction, AuditEntry};
use domain::bridge::{BridgeVariable, FlowBridge};
use domain::driver::{ConnectionInfo, Protocol};
use domain::event::AuditSink;
use domain::tag::{CategorizedTags, TagTable};
use domain::{DomainError, Permission, Requester, TagDataType, TagDefinition, TagName};
use infrastructure::bridge::s7_variables;
use infrastructure::config::GatewayConfig;
use infrastructure::drivers::s7::{InferredType, infer_type, is_foreign};
use infrastructure::messaging::{BrokerAddress, MqttTelemetry, TelemetryStatus};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::registry::{RemoveOutcome, TagRegistry};
use crate::router::DriverRouter;

/// `{success, message}` answer of every mutating command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Extra fields merged next to `success` and `message`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttState {
    pub connected: bool,
    pub config: TelemetryStatus,
}

/// Full merged state for the status query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub protocol: Protocol,
    pub connected: bool,
    pub switching: bool,
    pub config: Value,
    pub connection_info: ConnectionInfo,
    pub drivers: Vec<ConnectionInfo>,
    pub tags: TagTable,
    pub categorized_tags: CategorizedTags,
    pub mqtt: MqttState,
}

/// Datatype for a new tag: the declared one when it parses, else inferred
/// from an S7 address. OPC UA node ids carry no type in their syntax.
pub fn resolve_datatype(declared: Option<&str>, address: &str) -> Option<TagDataType> {
    if let Some(datatype) = declared.and_then(TagDataType::parse) {
        return Some(datatype);
    }
    if is_foreign(address) {
        return None;
    }
    match infer_type(address) {
        InferredType::Boolean => Some(TagDataType::Boolean),
        InferredType::Float => Some(TagDataType::Float),
        InferredType::String => Some(TagDataType::String),
        InferredType::Integer(width) => Some(match width {
            domain::WireType::Byte | domain::WireType::SByte => TagDataType::Byte,
            domain::WireType::UInt16 => TagDataType::UInt16,
            domain::WireType::Int16 => TagDataType::Int16,
            _ => TagDataType::Int32,
        }),
        InferredType::Unknown => None,
    }
}

/// Command surface of the gateway. Every mutating operation checks the
/// requester's capabilities, answers with a [`CommandOutcome`] and leaves an
/// audit record.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    registry: Arc<TagRegistry>,
    router: Arc<DriverRouter>,
    bridge: Arc<dyn FlowBridge>,
    telemetry: Arc<MqttTelemetry>,
    audit: Arc<dyn AuditSink>,
}

impl GatewayService {
    pub fn new(
        config: Arc<GatewayConfig>,
        registry: Arc<TagRegistry>,
        router: Arc<DriverRouter>,
        bridge: Arc<dyn FlowBridge>,
        telemetry: Arc<MqttTelemetry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            bridge,
            telemetry,
            audit,
        }
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<DriverRouter> {
        &self.router
    }

    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            warn!("Failed to write audit entry: {}", e);
        }
    }

    async fn authorize(
        &self,
        requester: &Requester,
        permission: Permission,
        attempted: &str,
    ) -> Result<(), CommandOutcome> {
        match requester.require(permission) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(user = %requester.username, permission = permission.as_str(), "{} denied", attempted);
                self.record(
                    AuditEntry::new(
                        &requester.username,
                        AuditAction::Denied,
                        format!("Denied: {}", attempted),
                    )
                    .with_meta(json!({ "permission": permission.as_str() })),
                )
                .await;
                Err(CommandOutcome::fail(format!("Permission Denied: {}", e)))
            }
        }
    }

    async fn tag_lists(&self) -> Value {
        let tags = self.registry.effective();
        json!({
            "tags": &*tags,
            "categorizedTags": self.registry.categorized().await,
        })
    }

    /// Loads the default protocol's driver with the tag table and connects
    /// it to its configured target.
    pub async fn start(&self) -> CommandOutcome {
        let protocol = self.config.default_protocol.clone();
        info!(protocol = %protocol, "Auto-connecting");
        self.switch(&protocol, None).await
    }

    pub async fn connect(
        &self,
        requester: &Requester,
        protocol: Option<&str>,
        target: Option<&str>,
    ) -> CommandOutcome {
        let requested = protocol
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(self.config.default_protocol.as_str())
            .to_string();
        info!(protocol = %requested, target = ?target, "Connection request");

        let outcome = self.switch(&requested, target).await;
        self.record(
            AuditEntry::new(
                &requester.username,
                AuditAction::Connect,
                format!("Connect {} -> {}", requested, target.unwrap_or("(configured)")),
            )
            .with_meta(json!({ "success": outcome.success })),
        )
        .await;
        outcome
    }

    async fn switch(&self, requested: &str, target: Option<&str>) -> CommandOutcome {
        let tags = self.registry.effective();
        let result = self.router.switch_protocol(requested, target, &tags).await;
        let driver = self.router.active();
        let info = driver.describe_connection();
        let data = json!({ "connected": driver.is_connected(), "info": info });

        match result {
            Ok(protocol) => {
                CommandOutcome::ok(format!("Connected via {}", protocol)).with_data(data)
            }
            Err(DomainError::SwitchInProgress) => {
                CommandOutcome::fail(DomainError::SwitchInProgress.to_string())
            }
            Err(e) => CommandOutcome::fail(e.to_string()).with_data(data),
        }
    }

    pub async fn add_tag(
        &self,
        requester: &Requester,
        name: &str,
        address: &str,
        datatype: Option<&str>,
    ) -> CommandOutcome {
        if let Err(denied) = self.authorize(requester, Permission::AddTag, "add tag").await {
            return denied;
        }

        let address = address.trim();
        if name.trim().is_empty() || address.is_empty() {
            return CommandOutcome::fail("Name and address required");
        }
        let tag_name = match TagName::new(name) {
            Ok(tag_name) => tag_name,
            Err(e) => return CommandOutcome::fail(e.to_string()),
        };

        let definition = TagDefinition::new(
            tag_name,
            address,
            resolve_datatype(datatype, address),
            &requester.username,
        );
        let name = definition.name.clone();
        let address = definition.address.clone();

        if let Err(e) = self.registry.add(definition).await {
            return CommandOutcome::fail(e.to_string());
        }

        let added: TagTable = [(name.clone(), address.clone())].into();
        if let Err(e) = self.router.sync_tags(&added).await {
            warn!(tag = %name, "Active driver did not accept new tag: {}", e);
        }

        self.record(AuditEntry::new(
            &requester.username,
            AuditAction::AddTag,
            format!("Added tag: {} ({})", name, address),
        ))
        .await;

        CommandOutcome::ok(format!("Tag {} added", name)).with_data(self.tag_lists().await)
    }

    pub async fn delete_tag(&self, requester: &Requester, name: &str) -> CommandOutcome {
        if let Err(denied) = self
            .authorize(requester, Permission::DeleteTag, "delete tag")
            .await
        {
            return denied;
        }

        match self.registry.remove(name).await {
            Ok(RemoveOutcome::Removed) => {
                // A tag still present in base stays polled under its base address.
                match self.registry.address_of(name) {
                    Some(address) => {
                        let restored: TagTable = [(name.to_string(), address)].into();
                        if let Err(e) = self.router.sync_tags(&restored).await {
                            warn!(tag = %name, "Failed to restore base address: {}", e);
                        }
                    }
                    None => self.router.remove_tag(name).await,
                }
                self.record(AuditEntry::new(
                    &requester.username,
                    AuditAction::DeleteTag,
                    format!("Deleted tag: {}", name),
                ))
                .await;
                CommandOutcome::ok(format!("Tag {} deleted", name))
                    .with_data(self.tag_lists().await)
            }
            Ok(RemoveOutcome::BaseTagProtected) => CommandOutcome::fail(format!(
                "Tag {} is a base tag and cannot be deleted",
                name
            )),
            Ok(RemoveOutcome::NotFound) => {
                CommandOutcome::fail(DomainError::UnknownTag(name.to_string()).to_string())
            }
            Err(e) => CommandOutcome::fail(e.to_string()),
        }
    }

    pub async fn write(&self, requester: &Requester, tag: &str, value: &Value) -> CommandOutcome {
        if tag.trim().is_empty() || value.is_null() {
            return CommandOutcome::fail("Tag name and value are required");
        }
        if let Err(denied) = self
            .authorize(requester, Permission::WriteTag, "write tag")
            .await
        {
            return denied;
        }

        let driver = self.router.active();
        match driver.write(tag, value).await {
            Ok(outcome) => {
                info!(tag = %tag, value = %outcome.value, wire_type = %outcome.wire_type, "Write succeeded");
                self.record(
                    AuditEntry::new(
                        &requester.username,
                        AuditAction::WriteTag,
                        format!("Wrote {} to {}", value, tag),
                    )
                    .with_meta(json!({ "protocol": driver.protocol() })),
                )
                .await;
                CommandOutcome::ok(format!("Wrote {} to {}", outcome.value, tag)).with_data(json!({
                    "tag": outcome.tag,
                    "value": outcome.value,
                    "wireType": outcome.wire_type,
                }))
            }
            Err(e) => {
                warn!(tag = %tag, "Write failed: {}", e);
                CommandOutcome::fail(e.to_string())
            }
        }
    }

    /// Deploys the S7 subset of `tags` (or the effective table) to the flow engine.
    pub async fn sync_flow(
        &self,
        requester: &Requester,
        tags: Option<TagTable>,
        plc_address: Option<&str>,
    ) -> CommandOutcome {
        let tags = tags.unwrap_or_else(|| (*self.registry.effective()).clone());
        let variables = s7_variables(&tags);
        if variables.is_empty() {
            return CommandOutcome::fail("No valid S7 tags found to sync.");
        }

        let plc_address = plc_address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.config.bridge.plc_address.as_str());
        info!(variables = variables.len(), plc = %plc_address, "Syncing tags to Node-RED");

        let outcome = match self.bridge.deploy(&variables, plc_address).await {
            Ok(()) => CommandOutcome::ok("Flow deployed to Node-RED")
                .with_data(json!({ "variables": variables.len() })),
            Err(DomainError::BridgeUnavailable(_)) => {
                CommandOutcome::fail("Could not connect to Node-RED")
            }
            Err(_) => CommandOutcome::fail("Node-RED rejected flow"),
        };

        self.record(
            AuditEntry::new(
                &requester.username,
                AuditAction::SyncFlow,
                format!("Synced {} tags to Node-RED", variables.len()),
            )
            .with_meta(json!({ "success": outcome.success })),
        )
        .await;
        outcome
    }

    /// Pulls every `{name, addr}` pair out of the deployed flows into the overlay.
    pub async fn import_flow(&self, requester: &Requester) -> CommandOutcome {
        if let Err(denied) = self
            .authorize(requester, Permission::AddTag, "import tags")
            .await
        {
            return denied;
        }

        let variables = match self.bridge.export().await {
            Ok(variables) => variables,
            Err(e) => return CommandOutcome::fail(e.to_string()),
        };

        let mut imported = TagTable::new();
        let definitions: Vec<TagDefinition> = variables
            .into_iter()
            .filter_map(|BridgeVariable { name, addr }| match TagName::new(&name) {
                Ok(tag_name) => {
                    imported.insert(name, addr.clone());
                    let datatype = resolve_datatype(None, &addr);
                    Some(TagDefinition::new(
                        tag_name,
                        addr,
                        datatype,
                        &requester.username,
                    ))
                }
                Err(e) => {
                    warn!(tag = %name, "Skipping imported variable: {}", e);
                    None
                }
            })
            .collect();

        let effective = match self.registry.import(definitions).await {
            Ok(effective) => effective,
            Err(e) => return CommandOutcome::fail(e.to_string()),
        };
        if let Err(e) = self.router.sync_tags(&effective).await {
            warn!("Active driver did not accept imported tags: {}", e);
        }

        self.record(AuditEntry::new(
            &requester.username,
            AuditAction::ImportTags,
            format!("Imported {} tags from Node-RED", imported.len()),
        ))
        .await;

        CommandOutcome::ok(format!("Imported {} tags from Node-RED", imported.len()))
            .with_data(json!({ "tags": imported }))
    }

    /// Re-points the telemetry link. The link comes up asynchronously.
    pub async fn mqtt_connect(
        &self,
        broker_url: Option<&str>,
        topic: Option<&str>,
    ) -> CommandOutcome {
        let broker = match broker_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => match BrokerAddress::parse(url) {
                Ok(broker) => broker,
                Err(e) => return CommandOutcome::fail(e.to_string()),
            },
            None => BrokerAddress::new(&self.config.mqtt.host, self.config.mqtt.port),
        };

        let url = broker.url();
        self.telemetry
            .connect(broker, topic.map(str::to_string))
            .await;
        CommandOutcome::ok(format!("Connecting to {}", url))
    }

    pub async fn status(&self) -> GatewayStatus {
        let driver = self.router.active();
        let telemetry = self.telemetry.status();
        GatewayStatus {
            protocol: driver.protocol(),
            connected: driver.is_connected(),
            switching: self.router.is_switching(),
            config: serde_json::to_value(&*self.config).unwrap_or(Value::Null),
            connection_info: driver.describe_connection(),
            drivers: self.router.describe_all(),
            tags: (*self.registry.effective()).clone(),
            categorized_tags: self.registry.categorized().await,
            mqtt: MqttState {
                connected: telemetry.connected,
                config: telemetry,
            },
        }
    }

    /// Disconnects the active driver; used on shutdown.
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
        self.telemetry.disconnect().await;
    }
}
