use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use domain::GatewayEvent;
use domain::event::SnapshotSink;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::fanout::Broadcaster;
use crate::router::DriverRouter;

const LINK_UNKNOWN: u8 = 0;
const LINK_DOWN: u8 = 1;
const LINK_UP: u8 = 2;

/// Drives the once-per-interval status and data broadcast.
pub struct Scheduler {
    router: Arc<DriverRouter>,
    broadcaster: Arc<Broadcaster>,
    telemetry: Option<Arc<dyn SnapshotSink>>,
    period: Duration,
    last_link: AtomicU8,
}

impl Scheduler {
    pub fn new(router: Arc<DriverRouter>, broadcaster: Arc<Broadcaster>, period: Duration) -> Self {
        Self {
            router,
            broadcaster,
            telemetry: None,
            period,
            last_link: AtomicU8::new(LINK_UNKNOWN),
        }
    }

    /// Link whose availability is reported as `mqtt-status` on change.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn SnapshotSink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// One tick: status first, then data when connected.
    pub async fn tick(&self) {
        let driver = self.router.active();
        let connected = driver.is_connected();
        let hub = self.broadcaster.hub();

        hub.publish(GatewayEvent::plc_status(connected, driver.protocol()));
        self.report_link();

        if !connected {
            return;
        }

        let raw = driver.snapshot();
        if self.broadcaster.broadcast(&raw).await.is_none() {
            debug!(protocol = %driver.protocol(), "Empty snapshot, no data event");
        }
    }

    fn report_link(&self) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let now = if telemetry.is_available() {
            LINK_UP
        } else {
            LINK_DOWN
        };
        if self.last_link.swap(now, Ordering::Relaxed) != now {
            self.broadcaster
                .hub()
                .publish(GatewayEvent::mqtt_status(now == LINK_UP));
        }
    }

    /// Ticks until `cancel` fires. Each tick runs on its own task so a
    /// panicking driver cannot stop the loop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.period.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let this = self.clone();
                    if let Err(e) = tokio::spawn(async move { this.tick().await }).await {
                        if e.is_panic() {
                            error!("Scheduler tick panicked: {}", e);
                        }
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}
