use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use domain::DomainError;
use domain::coercion::{WireType, WireValue};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{DataChange, NodeId, NodeRead, OpcUaTransport, SubscriptionParams};

#[derive(Debug, Clone)]
struct Variable {
    value: Value,
    type_id: u32,
}

struct MonitoredEntry {
    node: NodeId,
    handle: String,
}

struct SubscriptionEntry {
    sink: mpsc::Sender<DataChange>,
    items: HashMap<u32, MonitoredEntry>,
}

#[derive(Default)]
struct ServerState {
    endpoint: Option<String>,
    address_space: HashMap<NodeId, Variable>,
    subscriptions: HashMap<u32, SubscriptionEntry>,
}

/// In-memory OPC UA server.
///
/// Variables must exist before they can be monitored or written. A new
/// monitored item immediately receives the current value, and every change
/// (write or [`SimulatedOpcUa::set_value`]) is pushed to the subscriptions
/// watching that node.
pub struct SimulatedOpcUa {
    state: Mutex<ServerState>,
    next_id: AtomicU32,
    refuse_connections: AtomicBool,
}

impl Default for SimulatedOpcUa {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOpcUa {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            next_id: AtomicU32::new(1),
            refuse_connections: AtomicBool::new(false),
        }
    }

    /// Seeds a few telegram-style variables
    pub fn with_demo_nodes(self) -> Self {
        let demo = [
            ("ns=0;i=2253", json!("Server"), WireType::String),
            ("ns=2;i=5001", json!(0), WireType::Int32),
            ("ns=3;s=PLC", json!(true), WireType::Boolean),
            ("ns=2;s=Telegram_Production", json!(0), WireType::UInt32),
            ("ns=2;s=Telegram_Status", json!(1), WireType::Int16),
            ("ns=2;s=Telegram_Process", json!(21.5), WireType::Double),
        ];
        for (node, value, wire) in demo {
            if let Ok(node) = NodeId::parse(node) {
                self.add_variable(node, value, type_id_of(wire));
            }
        }
        self
    }

    pub fn add_variable(&self, node: NodeId, value: Value, type_id: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.address_space.insert(node, Variable { value, type_id });
        }
    }

    /// Changes a variable and notifies its monitors.
    pub fn set_value(&self, node: &str, value: Value) -> Result<(), DomainError> {
        let node = NodeId::parse(node)?;
        let mut state = self.lock()?;
        let variable = state
            .address_space
            .get_mut(&node)
            .ok_or_else(|| DomainError::DriverError("BadNodeIdUnknown".into()))?;
        variable.value = value.clone();
        Self::notify(&state, &node, &value);
        Ok(())
    }

    pub fn value_of(&self, node: &str) -> Option<Value> {
        let node = NodeId::parse(node).ok()?;
        let state = self.state.lock().ok()?;
        state.address_space.get(&node).map(|v| v.value.clone())
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn monitored_item_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.subscriptions.values().map(|sub| sub.items.len()).sum())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.subscriptions.len())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServerState>, DomainError> {
        self.state
            .lock()
            .map_err(|_| DomainError::DriverError("simulator state poisoned".into()))
    }

    fn require_session(state: &ServerState) -> Result<(), DomainError> {
        if state.endpoint.is_some() {
            Ok(())
        } else {
            Err(DomainError::NotConnected)
        }
    }

    fn notify(state: &ServerState, node: &NodeId, value: &Value) {
        for sub in state.subscriptions.values() {
            for item in sub.items.values().filter(|i| &i.node == node) {
                let _ = sub.sink.try_send(DataChange {
                    handle: item.handle.clone(),
                    value: value.clone(),
                    status: "Good".into(),
                    source_timestamp: Some(Utc::now()),
                });
            }
        }
    }
}

fn type_id_of(wire: WireType) -> u32 {
    (1..=12)
        .find(|id| WireType::from_opcua_id(*id) == Some(wire))
        .unwrap_or(12)
}

#[async_trait]
impl OpcUaTransport for SimulatedOpcUa {
    async fn connect(&self, endpoint: &str) -> Result<(), DomainError> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(DomainError::ConnectionFailure(format!(
                "{} is not reachable",
                endpoint
            )));
        }
        self.lock()?.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        state.endpoint = None;
        state.subscriptions.clear();
        Ok(())
    }

    async fn create_subscription(
        &self,
        _params: SubscriptionParams,
        sink: mpsc::Sender<DataChange>,
    ) -> Result<u32, DomainError> {
        let mut state = self.lock()?;
        Self::require_session(&state)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        state.subscriptions.insert(
            id,
            SubscriptionEntry {
                sink,
                items: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn delete_subscription(&self, subscription_id: u32) -> Result<(), DomainError> {
        self.lock()?.subscriptions.remove(&subscription_id);
        Ok(())
    }

    async fn monitor(
        &self,
        subscription_id: u32,
        node: &NodeId,
        handle: &str,
    ) -> Result<u32, DomainError> {
        let mut state = self.lock()?;
        Self::require_session(&state)?;
        let current = state
            .address_space
            .get(node)
            .map(|v| v.value.clone())
            .ok_or_else(|| DomainError::DriverError(format!("BadNodeIdUnknown: {}", node)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sub = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| DomainError::DriverError("BadSubscriptionIdInvalid".into()))?;
        sub.items.insert(
            id,
            MonitoredEntry {
                node: node.clone(),
                handle: handle.to_string(),
            },
        );

        let _ = sub.sink.try_send(DataChange {
            handle: handle.to_string(),
            value: current,
            status: "Good".into(),
            source_timestamp: Some(Utc::now()),
        });
        Ok(id)
    }

    async fn unmonitor(&self, subscription_id: u32, item_id: u32) -> Result<(), DomainError> {
        if let Some(sub) = self.lock()?.subscriptions.get_mut(&subscription_id) {
            sub.items.remove(&item_id);
        }
        Ok(())
    }

    async fn read(&self, node: &NodeId) -> Result<NodeRead, DomainError> {
        let state = self.lock()?;
        Self::require_session(&state)?;
        let variable = state
            .address_space
            .get(node)
            .ok_or_else(|| DomainError::DriverError(format!("BadNodeIdUnknown: {}", node)))?;
        Ok(NodeRead {
            value: variable.value.clone(),
            type_id: variable.type_id,
            status: "Good".into(),
        })
    }

    async fn write(
        &self,
        node: &NodeId,
        type_id: u32,
        value: &WireValue,
    ) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        Self::require_session(&state)?;
        let variable = state
            .address_space
            .get_mut(node)
            .ok_or_else(|| DomainError::DriverError(format!("BadNodeIdUnknown: {}", node)))?;
        if variable.type_id != type_id {
            return Err(DomainError::DriverError(
                "Write failed with status: BadTypeMismatch".into(),
            ));
        }
        let json = value.to_json();
        variable.value = json.clone();
        Self::notify(&state, node, &json);
        Ok(())
    }
}
