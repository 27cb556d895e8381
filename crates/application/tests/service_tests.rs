use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::{Broadcaster, DriverRouter, GatewayService, LiveHub, Scheduler, TagRegistry};
use async_trait::async_trait;
use domain::audit::{AuditAction, AuditEntry};
use domain::bridge::{BridgeVariable, FlowBridge};
use domain::driver::Protocol;
use domain::event::AuditSink;
use domain::{DomainError, GatewayEvent, Permission, Requester};
use infrastructure::config::GatewayConfig;
use infrastructure::drivers::{DriverFactory, SimulatedOpcUa, SimulatedS7};
use infrastructure::{JsonTagStore, MqttTelemetry};
use serde_json::json;
use tempfile::TempDir;

// --- In-memory collaborators ---

#[derive(Default)]
struct MemoryAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAudit {
    fn actions(&self) -> Vec<AuditAction> {
        self.entries.lock().unwrap().iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn record(&self, entry: AuditEntry) -> Result<(), DomainError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Flow engine that hands back whatever was last deployed.
#[derive(Default)]
struct MemoryFlows {
    deployed: Mutex<Vec<BridgeVariable>>,
    plc_address: Mutex<Option<String>>,
}

#[async_trait]
impl FlowBridge for MemoryFlows {
    async fn deploy(&self, variables: &[BridgeVariable], plc_address: &str) -> Result<(), DomainError> {
        *self.deployed.lock().unwrap() = variables.to_vec();
        *self.plc_address.lock().unwrap() = Some(plc_address.to_string());
        Ok(())
    }

    async fn export(&self) -> Result<Vec<BridgeVariable>, DomainError> {
        Ok(self.deployed.lock().unwrap().clone())
    }

    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }

    fn url(&self) -> &str {
        "http://flows.test"
    }
}

struct Fixture {
    _dir: TempDir,
    s7: Arc<SimulatedS7>,
    opcua: Arc<SimulatedOpcUa>,
    flows: Arc<MemoryFlows>,
    audit: Arc<MemoryAudit>,
    service: GatewayService,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = GatewayConfig::default_settings().unwrap();
    config.s7.poll_ms = 20;
    config.s7.timeout_ms = 5_000;

    let store = Arc::new(store_in(dir.path()));
    let registry = Arc::new(TagRegistry::load(store).await.unwrap());

    let s7 = Arc::new(SimulatedS7::new());
    let opcua = Arc::new(SimulatedOpcUa::new().with_demo_nodes());
    let flows = Arc::new(MemoryFlows::default());
    let drivers = DriverFactory::create_all(&config, s7.clone(), opcua.clone(), flows.clone());
    let router = DriverRouter::new(drivers, Protocol::OpcUa, Duration::from_secs(1)).unwrap();
    let audit = Arc::new(MemoryAudit::default());

    let service = GatewayService::new(
        Arc::new(config),
        registry,
        Arc::new(router),
        flows.clone(),
        Arc::new(MqttTelemetry::new("test", "plant/data")),
        audit.clone(),
    );

    Fixture {
        _dir: dir,
        s7,
        opcua,
        flows,
        audit,
        service,
    }
}

fn store_in(dir: &Path) -> JsonTagStore {
    JsonTagStore::new(
        dir.join("tags-base.json"),
        dir.join("tags-new.json"),
        dir.join("tag-metadata.json"),
    )
}

fn engineer() -> Requester {
    Requester::new(
        "engineer",
        vec![
            Permission::ReadTag,
            Permission::WriteTag,
            Permission::AddTag,
            Permission::DeleteTag,
        ],
    )
}

fn viewer() -> Requester {
    Requester::new("viewer", vec![Permission::ReadTag])
}

#[tokio::test]
async fn test_boolean_write_coerces_text() {
    let f = fixture().await;
    let connected = f.service.connect(&engineer(), Some("S7"), None).await;
    assert!(connected.success, "{}", connected.message);

    let outcome = f.service.write(&engineer(), "Running", &json!("true")).await;

    assert!(outcome.success, "{}", outcome.message);
    let data = outcome.data.unwrap();
    assert_eq!(data["value"], json!(true));
    assert_eq!(data["wireType"], "Boolean");
    assert_eq!(f.s7.get("DB1,X8.0"), Some(json!(true)));
    assert_eq!(
        f.audit.actions(),
        vec![AuditAction::Connect, AuditAction::WriteTag]
    );
}

#[tokio::test]
async fn test_uncoercible_write_never_reaches_the_controller() {
    let f = fixture().await;
    f.service.connect(&engineer(), Some("S7"), None).await;

    let outcome = f
        .service
        .write(&engineer(), "Running", &json!("notabool"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Invalid value"), "{}", outcome.message);
    assert_eq!(f.s7.write_count(), 0);
}

#[tokio::test]
async fn test_write_without_value_is_rejected_before_permission_check() {
    let f = fixture().await;

    let outcome = f.service.write(&viewer(), "Running", &json!(null)).await;

    assert_eq!(outcome.message, "Tag name and value are required");
    assert!(f.audit.actions().is_empty());
}

#[tokio::test]
async fn test_denied_command_is_audited() {
    let f = fixture().await;

    let outcome = f.service.write(&viewer(), "Running", &json!(1)).await;

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Permission Denied"));
    let entries = f.audit.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Denied);
    assert_eq!(entries[0].user, "viewer");
    assert_eq!(entries[0].meta.as_ref().unwrap()["permission"], "write_tag");
}

#[tokio::test]
async fn test_add_tag_requires_name_and_address() {
    let f = fixture().await;

    let outcome = f.service.add_tag(&engineer(), "Speed", "  ", None).await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Name and address required");
}

#[tokio::test]
async fn test_add_then_delete_overlay_tag() {
    let f = fixture().await;

    let added = f
        .service
        .add_tag(&engineer(), "Pressure", "DB4,REAL0", None)
        .await;
    assert!(added.success, "{}", added.message);
    let data = added.data.unwrap();
    assert_eq!(data["tags"]["Pressure"], "DB4,REAL0");
    assert_eq!(data["categorizedTags"]["new"]["Pressure"]["owner"], "engineer");

    let deleted = f.service.delete_tag(&engineer(), "Pressure").await;
    assert!(deleted.success, "{}", deleted.message);
    assert!(f.service.registry().address_of("Pressure").is_none());
}

#[tokio::test]
async fn test_base_tag_cannot_be_deleted() {
    let f = fixture().await;

    let outcome = f.service.delete_tag(&engineer(), "Machine_Speed").await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "Tag Machine_Speed is a base tag and cannot be deleted"
    );
    assert!(f.service.registry().effective().contains_key("Machine_Speed"));
}

#[tokio::test]
async fn test_sync_then_import_round_trips_s7_tags() {
    let f = fixture().await;
    f.service
        .add_tag(&engineer(), "Speed_Setpoint", "ns=2;s=Speed", None)
        .await;

    let synced = f.service.sync_flow(&engineer(), None, Some("10.1.1.5")).await;
    assert!(synced.success, "{}", synced.message);
    assert_eq!(synced.message, "Flow deployed to Node-RED");
    assert_eq!(f.flows.plc_address.lock().unwrap().as_deref(), Some("10.1.1.5"));
    // OPC UA node ids stay out of the flow.
    let names: Vec<String> = f
        .flows
        .deployed
        .lock()
        .unwrap()
        .iter()
        .map(|v| v.name.clone())
        .collect();
    assert!(names.contains(&"Machine_Speed".to_string()));
    assert!(!names.contains(&"Speed_Setpoint".to_string()));

    let imported = f.service.import_flow(&engineer()).await;
    assert!(imported.success, "{}", imported.message);
    assert_eq!(
        imported.message,
        format!("Imported {} tags from Node-RED", names.len())
    );
    let overlay = f.service.registry().categorized().await;
    assert!(overlay.new.contains_key("Machine_Speed"));
    assert!(f.audit.actions().contains(&AuditAction::ImportTags));
}

#[tokio::test]
async fn test_sync_without_s7_tags_fails() {
    let f = fixture().await;
    let only_opcua = [("Speed".to_string(), "ns=2;s=Speed".to_string())].into();

    let outcome = f.service.sync_flow(&engineer(), Some(only_opcua), None).await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "No valid S7 tags found to sync.");
    assert!(f.flows.deployed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_reports_active_protocol_and_tags() {
    let f = fixture().await;

    let status = serde_json::to_value(f.service.status().await).unwrap();

    assert_eq!(status["protocol"], "OPC UA");
    assert_eq!(status["connected"], false);
    assert_eq!(status["switching"], false);
    assert_eq!(status["tags"]["Running"], "DB1,X8.0");
    assert_eq!(status["drivers"].as_array().unwrap().len(), 3);
    assert_eq!(status["mqtt"]["connected"], false);
    assert_eq!(status["config"]["default_protocol"], "OPC UA");
}

#[tokio::test]
async fn test_invalid_broker_url_is_rejected() {
    let f = fixture().await;

    let outcome = f.service.mqtt_connect(Some("http://broker"), None).await;

    assert!(!outcome.success);
}

#[tokio::test]
async fn test_tag_added_mid_switch_reaches_the_new_driver() {
    let f = fixture().await;
    let connected = f.service.connect(&engineer(), Some("S7"), None).await;
    assert!(connected.success, "{}", connected.message);
    f.s7.set_disconnect_delay(Some(Duration::from_millis(300)));

    let switcher = engineer();
    let switch = f.service.connect(&switcher, Some("OPC UA"), None);
    let add = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.service
            .add_tag(&engineer(), "Late", "ns=2;s=Telegram_Status", None)
            .await
    };
    let (switched, added) = tokio::join!(switch, add);

    assert!(switched.success, "{}", switched.message);
    assert!(added.success, "{}", added.message);
    let active = f.service.router().active();
    assert_eq!(active.protocol(), Protocol::OpcUa);
    let names: Vec<String> = active.snapshot().into_iter().map(|(n, _)| n).collect();
    assert!(names.contains(&"Late".to_string()), "{names:?}");
}

#[tokio::test]
async fn test_subscriber_after_refused_switch_sees_no_previous_driver_data() {
    let f = fixture().await;
    let hub = Arc::new(LiveHub::new(Protocol::OpcUa));
    let scheduler = Scheduler::new(
        f.service.router().clone(),
        Arc::new(Broadcaster::new(hub.clone())),
        Duration::from_secs(1),
    );

    f.s7.set("DB1,INT0", json!(1200)).unwrap();
    f.service.connect(&engineer(), Some("S7"), None).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    scheduler.tick().await;

    f.opcua.refuse_connections(true);
    let refused = f.service.connect(&engineer(), Some("OPC UA"), None).await;
    assert!(!refused.success);
    scheduler.tick().await;

    for replay in [
        hub.subscribe().replay,
        hub.subscribe_to(f.service.router().active().as_ref()).replay,
    ] {
        assert_eq!(replay[0], GatewayEvent::plc_status(false, Protocol::OpcUa));
        let stale = replay.iter().any(|event| match event {
            GatewayEvent::PlcData(data) => data.get("Machine_Speed") == Some(&json!(1200)),
            _ => false,
        });
        assert!(!stale, "{replay:?}");
    }
}
