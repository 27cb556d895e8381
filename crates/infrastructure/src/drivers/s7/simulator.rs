use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::DomainError;
use domain::coercion::WireValue;
use serde_json::{Value, json};

use super::{S7Address, S7Endpoint, S7Item, S7Kind, S7Transport};
use crate::drivers::waveform::Waveform;

#[derive(Default)]
struct Session {
    endpoint: Option<S7Endpoint>,
    items: Vec<S7Item>,
}

/// In-memory S7 controller.
///
/// Memory starts zeroed; writes stick. With a waveform attached, REAL items
/// that were never written follow a sine wave so dashboards have something
/// to show.
pub struct SimulatedS7 {
    session: Mutex<Session>,
    memory: Mutex<HashMap<S7Address, Value>>,
    waveform: Option<Waveform>,
    refuse_connections: AtomicBool,
    fail_reads: AtomicBool,
    disconnect_delay: Mutex<Option<Duration>>,
    read_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    registrations: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for SimulatedS7 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedS7 {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(Session::default()),
            memory: Mutex::new(HashMap::new()),
            waveform: None,
            refuse_connections: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            disconnect_delay: Mutex::new(None),
            read_delay: Mutex::new(None),
            connects: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_waveform(mut self, min: f64, max: f64) -> Self {
        self.waveform = Some(Waveform::new(min, max));
        self
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes `disconnect` hang for `delay`
    pub fn set_disconnect_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.disconnect_delay.lock() {
            *guard = delay;
        }
    }

    /// Makes each `read_all` take `delay` after it has picked its items
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.read_delay.lock() {
            *guard = delay;
        }
    }

    /// Pokes a value straight into controller memory
    pub fn set(&self, address: &str, value: Value) -> Result<(), DomainError> {
        let address = S7Address::parse(address)?;
        self.lock_memory()?.insert(address, value);
        Ok(())
    }

    pub fn get(&self, address: &str) -> Option<Value> {
        let address = S7Address::parse(address).ok()?;
        self.memory.lock().ok()?.get(&address).cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Writes that reached the controller
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn registered_items(&self) -> Vec<String> {
        self.session
            .lock()
            .map(|s| s.items.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .map(|s| s.endpoint.is_some())
            .unwrap_or(false)
    }

    fn lock_session(&self) -> Result<std::sync::MutexGuard<'_, Session>, DomainError> {
        self.session
            .lock()
            .map_err(|_| DomainError::DriverError("simulator session poisoned".into()))
    }

    fn lock_memory(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<S7Address, Value>>, DomainError> {
        self.memory
            .lock()
            .map_err(|_| DomainError::DriverError("simulator memory poisoned".into()))
    }

    fn zero(kind: S7Kind) -> Value {
        match kind {
            S7Kind::Bit(_) => json!(false),
            S7Kind::Real => json!(0.0),
            S7Kind::Char | S7Kind::String(_) => json!(""),
            _ => json!(0),
        }
    }
}

#[async_trait]
impl S7Transport for SimulatedS7 {
    async fn connect(&self, endpoint: &S7Endpoint) -> Result<(), DomainError> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(DomainError::ConnectionFailure(format!(
                "{}:{} refused the connection",
                endpoint.host, endpoint.port
            )));
        }
        let mut session = self.lock_session()?;
        session.endpoint = Some(endpoint.clone());
        session.items.clear();
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        let delay = self.disconnect_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut session = self.lock_session()?;
        session.endpoint = None;
        session.items.clear();
        Ok(())
    }

    async fn register_items(&self, items: &[S7Item]) -> Result<(), DomainError> {
        let mut session = self.lock_session()?;
        if session.endpoint.is_none() {
            return Err(DomainError::NotConnected);
        }
        session.items = items.to_vec();
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<(), DomainError> {
        self.lock_session()?.items.retain(|i| i.name != name);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<(String, Value)>, DomainError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DomainError::DriverError("read timed out on the wire".into()));
        }
        let items = {
            let session = self.lock_session()?;
            if session.endpoint.is_none() {
                return Err(DomainError::NotConnected);
            }
            session.items.clone()
        };
        let delay = self.read_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let memory = self.lock_memory()?;
        Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let value = match (memory.get(&item.address), &self.waveform, item.address.kind) {
                    (Some(v), _, _) => v.clone(),
                    (None, Some(wave), S7Kind::Real) => json!(wave.sample(i as f64 / 7.0)),
                    (None, _, kind) => Self::zero(kind),
                };
                (item.name.clone(), value)
            })
            .collect())
    }

    async fn write_item(&self, item: &S7Item, value: &WireValue) -> Result<(), DomainError> {
        if self.lock_session()?.endpoint.is_none() {
            return Err(DomainError::NotConnected);
        }
        self.lock_memory()?
            .insert(item.address.clone(), value.to_json());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
