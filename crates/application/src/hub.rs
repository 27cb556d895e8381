use std::sync::Mutex;

use domain::GatewayEvent;
use domain::driver::{DeviceDriver, Protocol};
use tokio::sync::broadcast;
use tracing::debug;

use crate::fanout::flatten;

const CHANNEL_CAPACITY: usize = 64;

struct LastSeen {
    status: GatewayEvent,
    data: Option<GatewayEvent>,
    mqtt: GatewayEvent,
}

/// A live subscription: the replayed state, then the stream.
pub struct Subscription {
    pub replay: Vec<GatewayEvent>,
    pub receiver: broadcast::Receiver<GatewayEvent>,
}

/// Fan-out point for live subscribers.
///
/// Remembers the last event of each kind so a new subscriber starts from the
/// current state instead of waiting for the next tick.
pub struct LiveHub {
    sender: broadcast::Sender<GatewayEvent>,
    last: Mutex<LastSeen>,
}

impl LiveHub {
    pub fn new(initial_protocol: Protocol) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            last: Mutex::new(LastSeen {
                status: GatewayEvent::plc_status(false, initial_protocol),
                data: None,
                mqtt: GatewayEvent::mqtt_status(false),
            }),
        }
    }

    pub fn publish(&self, event: GatewayEvent) {
        // Record and send under the same lock so a concurrent subscribe
        // sees each event exactly once, either replayed or streamed.
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &event {
            GatewayEvent::PlcStatus(status) => {
                // Data recorded for another protocol is no longer current.
                if let GatewayEvent::PlcStatus(previous) = &last.status {
                    if previous.protocol != status.protocol {
                        last.data = None;
                    }
                }
                last.status = event.clone();
            }
            GatewayEvent::PlcData(_) => last.data = Some(event.clone()),
            GatewayEvent::MqttStatus(_) => last.mqtt = event.clone(),
        }
        if self.sender.send(event).is_err() {
            debug!("No live subscribers");
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut replay = vec![last.status.clone()];
        replay.extend(last.data.clone());
        replay.push(last.mqtt.clone());

        Subscription {
            replay,
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribes with status and data taken from `driver` itself, so a
    /// subscriber joining after a switch or a failed connect starts from the
    /// active driver's own cache.
    pub fn subscribe_to(&self, driver: &dyn DeviceDriver) -> Subscription {
        let status = GatewayEvent::plc_status(driver.is_connected(), driver.protocol());
        let data = flatten(&driver.snapshot());

        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut replay = vec![status];
        if !data.is_empty() {
            replay.push(GatewayEvent::PlcData(data));
        }
        replay.push(last.mqtt.clone());

        Subscription {
            replay,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
