use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use application::{Broadcaster, DriverRouter, LiveHub, Scheduler};
use async_trait::async_trait;
use domain::driver::{
    AcquisitionMode, ConnectionInfo, ConnectionState, DeviceDriver, Protocol, WriteOutcome,
};
use domain::event::SnapshotSink;
use domain::tag::{CachedValue, RawSnapshot, Sample, Snapshot, TagTable};
use domain::{DomainError, GatewayEvent};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

// --- Scripted driver ---

struct ScriptedDriver {
    connected: AtomicBool,
    cache: std::sync::Mutex<RawSnapshot>,
    panics_left: AtomicUsize,
}

impl ScriptedDriver {
    fn new(connected: bool, cache: RawSnapshot) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            cache: std::sync::Mutex::new(cache),
            panics_left: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    fn protocol(&self) -> Protocol {
        Protocol::OpcUa
    }

    fn acquisition(&self) -> AcquisitionMode {
        AcquisitionMode::Push
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn connect(&self, _target: Option<&str>) -> Result<(), DomainError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn update_tag_set(&self, _tags: &TagTable) -> Result<(), DomainError> {
        Ok(())
    }

    async fn remove_tag(&self, _name: &str) -> Result<(), DomainError> {
        Ok(())
    }

    async fn write(&self, _name: &str, _raw: &Value) -> Result<WriteOutcome, DomainError> {
        Err(DomainError::NotConnected)
    }

    fn snapshot(&self) -> RawSnapshot {
        if self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("driver blew up mid-tick");
        }
        self.cache.lock().unwrap().clone()
    }

    fn describe_connection(&self) -> ConnectionInfo {
        ConnectionInfo {
            protocol: Protocol::OpcUa,
            target: None,
            connected: self.is_connected(),
            state: self.connection_state(),
            acquisition: AcquisitionMode::Push,
            tag_count: 0,
            details: Map::new(),
        }
    }
}

// --- Telemetry link with a switchable state ---

struct FlakyLink {
    up: AtomicBool,
    published: AtomicUsize,
}

#[async_trait]
impl SnapshotSink for FlakyLink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn is_available(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    async fn publish(&self, _snapshot: &Snapshot) -> Result<(), DomainError> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scheduler_for(driver: Arc<ScriptedDriver>) -> (Arc<Scheduler>, Arc<LiveHub>) {
    let drivers: Vec<Arc<dyn DeviceDriver>> = vec![driver];
    let router = DriverRouter::new(drivers, Protocol::OpcUa, Duration::from_secs(1)).unwrap();
    let hub = Arc::new(LiveHub::new(Protocol::OpcUa));
    let broadcaster = Arc::new(Broadcaster::new(hub.clone()));
    let scheduler = Scheduler::new(Arc::new(router), broadcaster, Duration::from_millis(10));
    (Arc::new(scheduler), hub)
}

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    events
}

fn sample_cache() -> RawSnapshot {
    vec![
        (
            "Production".to_string(),
            CachedValue::Sample(Sample::good(json!(42))),
        ),
        ("Running".to_string(), CachedValue::Value(json!(true))),
    ]
}

#[tokio::test]
async fn test_disconnected_tick_emits_only_status() {
    let (scheduler, hub) = scheduler_for(ScriptedDriver::new(false, sample_cache()));
    let mut sub = hub.subscribe();

    scheduler.tick().await;

    assert_eq!(
        drain(&mut sub.receiver),
        vec![GatewayEvent::plc_status(false, Protocol::OpcUa)]
    );
}

#[tokio::test]
async fn test_connected_tick_emits_status_then_flat_data() {
    let (scheduler, hub) = scheduler_for(ScriptedDriver::new(true, sample_cache()));
    let mut sub = hub.subscribe();

    scheduler.tick().await;

    let events = drain(&mut sub.receiver);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], GatewayEvent::plc_status(true, Protocol::OpcUa));
    match &events[1] {
        GatewayEvent::PlcData(data) => {
            assert_eq!(data.keys().collect::<Vec<_>>(), vec!["Production", "Running"]);
            assert_eq!(data["Production"], json!(42));
        }
        other => panic!("expected data, got {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_tags_emits_status_but_no_data() {
    let (scheduler, hub) = scheduler_for(ScriptedDriver::new(true, Vec::new()));
    let mut sub = hub.subscribe();

    scheduler.tick().await;

    let events = drain(&mut sub.receiver);
    assert_eq!(events, vec![GatewayEvent::plc_status(true, Protocol::OpcUa)]);
}

#[tokio::test]
async fn test_panicking_tick_does_not_stop_the_loop() {
    let driver = ScriptedDriver::new(true, sample_cache());
    driver.panics_left.store(2, Ordering::SeqCst);
    let (scheduler, hub) = scheduler_for(driver.clone());
    let mut sub = hub.subscribe();

    let cancel = CancellationToken::new();
    let running = tokio::spawn(scheduler.clone().run(cancel.clone()));

    let data = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let GatewayEvent::PlcData(data) = sub.receiver.recv().await.unwrap() {
                return data;
            }
        }
    })
    .await
    .expect("data after the panicking ticks");

    assert_eq!(data["Running"], json!(true));
    assert_eq!(driver.panics_left.load(Ordering::SeqCst), 0);

    cancel.cancel();
    running.await.unwrap();
}

#[tokio::test]
async fn test_link_status_is_reported_on_change_only() {
    let driver = ScriptedDriver::new(true, sample_cache());
    let link = Arc::new(FlakyLink {
        up: AtomicBool::new(false),
        published: AtomicUsize::new(0),
    });

    let drivers: Vec<Arc<dyn DeviceDriver>> = vec![driver];
    let router = DriverRouter::new(drivers, Protocol::OpcUa, Duration::from_secs(1)).unwrap();
    let hub = Arc::new(LiveHub::new(Protocol::OpcUa));
    let broadcaster = Arc::new(Broadcaster::new(hub.clone()).with_sink(link.clone()));
    let scheduler = Scheduler::new(Arc::new(router), broadcaster, Duration::from_millis(10))
        .with_telemetry(link.clone());
    let mut sub = hub.subscribe();

    let mqtt_events = |events: Vec<GatewayEvent>| {
        events
            .into_iter()
            .filter(|e| matches!(e, GatewayEvent::MqttStatus(_)))
            .collect::<Vec<_>>()
    };

    scheduler.tick().await;
    scheduler.tick().await;
    assert_eq!(
        mqtt_events(drain(&mut sub.receiver)),
        vec![GatewayEvent::mqtt_status(false)]
    );
    assert_eq!(link.published.load(Ordering::SeqCst), 0);

    link.up.store(true, Ordering::SeqCst);
    scheduler.tick().await;
    scheduler.tick().await;
    assert_eq!(
        mqtt_events(drain(&mut sub.receiver)),
        vec![GatewayEvent::mqtt_status(true)]
    );
    assert_eq!(link.published.load(Ordering::SeqCst), 2);
}
