use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::DomainError;
use domain::coercion::{WireType, WireValue};
use opcua::client::{ClientBuilder, DataChangeCallback, IdentityToken, MonitoredItem, Session};
use opcua::crypto::SecurityPolicy;
use opcua::types::{
    AttributeId, DataValue, MessageSecurityMode, MonitoredItemCreateRequest, NodeId as UaNodeId,
    ReadValueId, StatusCode, TimestampsToReturn, UAString, UserTokenPolicy, Variant, WriteValue,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{DataChange, NodeId, NodeRead, OpcUaTransport, SubscriptionParams};
use crate::config::OpcUaConfig;

const LIFETIME_COUNT: u32 = 60;
const KEEP_ALIVE_COUNT: u32 = 10;

/// Client handles per subscription, keyed by monitored node.
type Handles = Arc<RwLock<HashMap<UaNodeId, String>>>;

struct Watched {
    params: SubscriptionParams,
    handles: Handles,
    /// Server item id to node, for teardown
    items: HashMap<u32, UaNodeId>,
}

struct Live {
    session: Arc<Session>,
    event_loop: JoinHandle<StatusCode>,
    subscriptions: HashMap<u32, Watched>,
}

/// OPC UA transport backed by an `async-opcua` client session.
///
/// Anonymous identity, no message security. Each data change is forwarded to
/// the subscription's channel with the tag name as its handle.
pub struct AsyncOpcUaTransport {
    application_name: String,
    pki_dir: String,
    live: Mutex<Option<Live>>,
}

impl AsyncOpcUaTransport {
    pub fn new(config: &OpcUaConfig) -> Self {
        Self {
            application_name: config.application_name.clone(),
            pki_dir: config.pki_dir.clone(),
            live: Mutex::new(None),
        }
    }

    async fn close(live: Live) {
        for id in live.subscriptions.keys() {
            if let Err(status) = live.session.delete_subscription(*id).await {
                debug!(subscription_id = id, "Delete subscription: {}", status);
            }
        }
        if let Err(status) = live.session.disconnect().await {
            debug!("OPC UA session close: {}", status);
        }
        live.event_loop.abort();
    }
}

fn ua_error(what: &str, status: StatusCode) -> DomainError {
    DomainError::DriverError(format!("{} failed with status: {}", what, status))
}

pub(crate) fn to_ua_node(node: &NodeId) -> Result<UaNodeId, DomainError> {
    UaNodeId::from_str(&node.to_string()).map_err(|_| DomainError::InvalidAddressFormat {
        protocol: "OPC UA".to_string(),
        address: node.to_string(),
    })
}

/// Built-in DataType id of a scalar variant, 0 when it has none we write.
pub(crate) fn type_id_of(variant: &Variant) -> u32 {
    match variant {
        Variant::Boolean(_) => 1,
        Variant::SByte(_) => 2,
        Variant::Byte(_) => 3,
        Variant::Int16(_) => 4,
        Variant::UInt16(_) => 5,
        Variant::Int32(_) => 6,
        Variant::UInt32(_) => 7,
        Variant::Int64(_) => 8,
        Variant::UInt64(_) => 9,
        Variant::Float(_) => 10,
        Variant::Double(_) => 11,
        Variant::String(_) => 12,
        _ => 0,
    }
}

pub(crate) fn variant_to_json(variant: Option<&Variant>) -> Value {
    match variant {
        None | Some(Variant::Empty) => Value::Null,
        Some(Variant::Boolean(v)) => json!(v),
        Some(Variant::SByte(v)) => json!(v),
        Some(Variant::Byte(v)) => json!(v),
        Some(Variant::Int16(v)) => json!(v),
        Some(Variant::UInt16(v)) => json!(v),
        Some(Variant::Int32(v)) => json!(v),
        Some(Variant::UInt32(v)) => json!(v),
        Some(Variant::Int64(v)) => json!(v),
        Some(Variant::UInt64(v)) => json!(v),
        Some(Variant::Float(v)) => json!(*v as f64),
        Some(Variant::Double(v)) => json!(v),
        Some(Variant::String(v)) => json!(v.value()),
        Some(Variant::DateTime(v)) => json!(v.as_chrono().to_rfc3339()),
        Some(other) => json!(format!("{:?}", other)),
    }
}

/// Encodes a coerced value as the variant the node's DataType expects.
pub(crate) fn to_variant(type_id: u32, value: &WireValue) -> Result<Variant, DomainError> {
    let target = WireType::from_opcua_id(type_id).ok_or_else(|| {
        DomainError::DriverError(format!("Unsupported OPC UA DataType id {}", type_id))
    })?;
    let mismatch = || {
        DomainError::InvalidValue(format!("{} cannot be written as {}", value.to_json(), target))
    };
    let int = || -> Result<i128, DomainError> {
        match value {
            WireValue::Int(i) => Ok(*i as i128),
            WireValue::UInt(u) => Ok(*u as i128),
            _ => Err(mismatch()),
        }
    };

    Ok(match target {
        WireType::Boolean => match value {
            WireValue::Boolean(b) => Variant::Boolean(*b),
            _ => return Err(mismatch()),
        },
        WireType::SByte => Variant::SByte(i8::try_from(int()?).map_err(|_| mismatch())?),
        WireType::Byte => Variant::Byte(u8::try_from(int()?).map_err(|_| mismatch())?),
        WireType::Int16 => Variant::Int16(i16::try_from(int()?).map_err(|_| mismatch())?),
        WireType::UInt16 => Variant::UInt16(u16::try_from(int()?).map_err(|_| mismatch())?),
        WireType::Int32 => Variant::Int32(i32::try_from(int()?).map_err(|_| mismatch())?),
        WireType::UInt32 => Variant::UInt32(u32::try_from(int()?).map_err(|_| mismatch())?),
        WireType::Int64 => Variant::Int64(i64::try_from(int()?).map_err(|_| mismatch())?),
        WireType::UInt64 => Variant::UInt64(u64::try_from(int()?).map_err(|_| mismatch())?),
        WireType::Float => match value {
            WireValue::Float(f) => Variant::Float(*f),
            WireValue::Double(f) => Variant::Float(*f as f32),
            _ => return Err(mismatch()),
        },
        WireType::Double => match value {
            WireValue::Double(f) => Variant::Double(*f),
            WireValue::Float(f) => Variant::Double(*f as f64),
            _ => return Err(mismatch()),
        },
        WireType::String => match value {
            WireValue::String(s) => Variant::String(UAString::from(s.as_str())),
            _ => return Err(mismatch()),
        },
    })
}

fn to_change(handle: String, value: &DataValue) -> DataChange {
    DataChange {
        handle,
        value: variant_to_json(value.value.as_ref()),
        status: value
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Good".to_string()),
        source_timestamp: value.source_timestamp.as_ref().map(|t| t.as_chrono()),
    }
}

#[async_trait]
impl OpcUaTransport for AsyncOpcUaTransport {
    async fn connect(&self, endpoint: &str) -> Result<(), DomainError> {
        let mut live = self.live.lock().await;
        if let Some(previous) = live.take() {
            Self::close(previous).await;
        }

        let mut client = ClientBuilder::new()
            .application_name(&self.application_name)
            .application_uri(format!("urn:{}", self.application_name.replace(' ', "-")))
            .pki_dir(&self.pki_dir)
            .create_sample_keypair(true)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .client()
            .map_err(|e| DomainError::InvalidConfiguration(e.join(", ")))?;

        let (session, event_loop) = client
            .connect_to_matching_endpoint(
                (
                    endpoint,
                    SecurityPolicy::None.to_uri(),
                    MessageSecurityMode::None,
                    UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .await
            .map_err(|status| {
                DomainError::ConnectionFailure(format!("{}: {}", endpoint, status))
            })?;

        let event_loop = event_loop.spawn();
        if !session.wait_for_connection().await {
            event_loop.abort();
            return Err(DomainError::ConnectionFailure(format!(
                "{}: session could not be activated",
                endpoint
            )));
        }
        info!(endpoint = %endpoint, "OPC UA session active");

        *live = Some(Live {
            session,
            event_loop,
            subscriptions: HashMap::new(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        if let Some(live) = self.live.lock().await.take() {
            Self::close(live).await;
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        params: SubscriptionParams,
        sink: mpsc::Sender<DataChange>,
    ) -> Result<u32, DomainError> {
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(DomainError::NotConnected)?;

        let handles: Handles = Arc::new(RwLock::new(HashMap::new()));
        let routed = handles.clone();
        let callback = DataChangeCallback::new(move |value: DataValue, item: &MonitoredItem| {
            let node = &item.item_to_monitor().node_id;
            let Some(handle) = routed.read().ok().and_then(|h| h.get(node).cloned()) else {
                return;
            };
            if sink.try_send(to_change(handle, &value)).is_err() {
                debug!("Notification channel full or closed, dropping data change");
            }
        });

        let id = live
            .session
            .create_subscription(
                Duration::from_millis(params.publishing_interval_ms),
                LIFETIME_COUNT,
                KEEP_ALIVE_COUNT,
                0,
                0,
                true,
                callback,
            )
            .await
            .map_err(|status| ua_error("Create subscription", status))?;

        live.subscriptions.insert(
            id,
            Watched {
                params,
                handles,
                items: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn delete_subscription(&self, subscription_id: u32) -> Result<(), DomainError> {
        let mut guard = self.live.lock().await;
        let Some(live) = guard.as_mut() else {
            return Ok(());
        };
        if live.subscriptions.remove(&subscription_id).is_some() {
            live.session
                .delete_subscription(subscription_id)
                .await
                .map_err(|status| ua_error("Delete subscription", status))?;
        }
        Ok(())
    }

    async fn monitor(
        &self,
        subscription_id: u32,
        node: &NodeId,
        handle: &str,
    ) -> Result<u32, DomainError> {
        let ua_node = to_ua_node(node)?;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(DomainError::NotConnected)?;
        let watched = live
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| DomainError::DriverError("BadSubscriptionIdInvalid".into()))?;

        if let Ok(mut handles) = watched.handles.write() {
            handles.insert(ua_node.clone(), handle.to_string());
        }

        let mut request: MonitoredItemCreateRequest = ua_node.clone().into();
        request.requested_parameters.sampling_interval =
            watched.params.sampling_interval_ms as f64;
        request.requested_parameters.queue_size = watched.params.queue_size;
        request.requested_parameters.discard_oldest = true;

        let created = live
            .session
            .create_monitored_items(subscription_id, TimestampsToReturn::Both, vec![request])
            .await
            .map_err(|status| ua_error("Create monitored item", status));

        let item = match created.map(|mut items| items.pop()) {
            Ok(Some(item)) if item.status_code.is_good() => item,
            outcome => {
                if let Ok(mut handles) = watched.handles.write() {
                    handles.remove(&ua_node);
                }
                return Err(match outcome {
                    Ok(Some(item)) => DomainError::DriverError(format!(
                        "{}: {}",
                        item.status_code, node
                    )),
                    Ok(None) => DomainError::DriverError(format!("No monitored item for {}", node)),
                    Err(e) => e,
                });
            }
        };

        let item_id = item.monitored_item_id;
        watched.items.insert(item_id, ua_node);
        Ok(item_id)
    }

    async fn unmonitor(&self, subscription_id: u32, item_id: u32) -> Result<(), DomainError> {
        let mut guard = self.live.lock().await;
        let Some(live) = guard.as_mut() else {
            return Ok(());
        };
        let Some(watched) = live.subscriptions.get_mut(&subscription_id) else {
            return Ok(());
        };
        if let Some(node) = watched.items.remove(&item_id) {
            if let Ok(mut handles) = watched.handles.write() {
                handles.remove(&node);
            }
        }
        live.session
            .delete_monitored_items(subscription_id, &[item_id])
            .await
            .map_err(|status| ua_error("Delete monitored item", status))?;
        Ok(())
    }

    async fn read(&self, node: &NodeId) -> Result<NodeRead, DomainError> {
        let ua_node = to_ua_node(node)?;
        let guard = self.live.lock().await;
        let live = guard.as_ref().ok_or(DomainError::NotConnected)?;

        let request = ReadValueId {
            node_id: ua_node,
            attribute_id: AttributeId::Value as u32,
            ..Default::default()
        };
        let mut values = live
            .session
            .read(&[request], TimestampsToReturn::Neither, 0.0)
            .await
            .map_err(|status| ua_error("Read", status))?;
        let value = values
            .pop()
            .ok_or_else(|| DomainError::DriverError(format!("Empty read result for {}", node)))?;

        let status = value.status.unwrap_or(StatusCode::Good);
        if !status.is_good() {
            return Err(DomainError::DriverError(format!("{}: {}", status, node)));
        }
        let variant = value.value.as_ref();
        Ok(NodeRead {
            value: variant_to_json(variant),
            type_id: variant.map(type_id_of).unwrap_or(0),
            status: status.to_string(),
        })
    }

    async fn write(
        &self,
        node: &NodeId,
        type_id: u32,
        value: &WireValue,
    ) -> Result<(), DomainError> {
        let ua_node = to_ua_node(node)?;
        let variant = to_variant(type_id, value)?;
        let guard = self.live.lock().await;
        let live = guard.as_ref().ok_or(DomainError::NotConnected)?;

        let request = WriteValue {
            node_id: ua_node,
            attribute_id: AttributeId::Value as u32,
            value: DataValue::new_now(variant),
            ..Default::default()
        };
        let results = live
            .session
            .write(&[request])
            .await
            .map_err(|status| ua_error("Write", status))?;

        match results.first() {
            Some(status) if status.is_good() => Ok(()),
            Some(status) => {
                warn!(node = %node, "Write rejected: {}", status);
                Err(DomainError::DriverError(format!(
                    "Write failed with status: {}",
                    status
                )))
            }
            None => Err(DomainError::DriverError("Write returned no status".into())),
        }
    }
}
