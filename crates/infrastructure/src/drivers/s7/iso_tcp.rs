use std::sync::RwLock;

use async_trait::async_trait;
use domain::DomainError;
use domain::coercion::WireValue;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::wire;
use super::{S7Endpoint, S7Item, S7Transport};

struct Connection {
    stream: TcpStream,
    pdu_size: u16,
    pdu_ref: u16,
}

impl Connection {
    async fn send(&mut self, frame: &[u8]) -> Result<Vec<u8>, DomainError> {
        self.stream.write_all(frame).await.map_err(io_error)?;
        read_frame(&mut self.stream).await
    }

    /// Sends a job built for the next PDU reference and returns the reply.
    async fn exchange(
        &mut self,
        build: impl FnOnce(u16) -> Vec<u8>,
    ) -> Result<Vec<u8>, DomainError> {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        let frame = build(self.pdu_ref);
        self.send(&frame).await
    }
}

fn io_error(e: std::io::Error) -> DomainError {
    DomainError::DriverError(format!("S7 socket error: {}", e))
}

/// Reads one TPKT frame and returns its payload.
async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, DomainError> {
    let mut header = [0u8; wire::TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await.map_err(io_error)?;
    if header[0] != wire::TPKT_VERSION {
        return Err(DomainError::DriverError(format!(
            "S7 protocol error: bad TPKT version {:#04x}",
            header[0]
        )));
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; len.saturating_sub(wire::TPKT_HEADER_LEN)];
    stream.read_exact(&mut payload).await.map_err(io_error)?;
    Ok(payload)
}

/// S7 transport speaking S7comm over ISO-on-TCP to a real controller.
///
/// One socket per session. Reads are batched to fit the PDU size the PLC
/// negotiated during setup.
pub struct IsoTcpS7 {
    connection: Mutex<Option<Connection>>,
    items: RwLock<Vec<S7Item>>,
}

impl Default for IsoTcpS7 {
    fn default() -> Self {
        Self::new()
    }
}

impl IsoTcpS7 {
    pub fn new() -> Self {
        Self {
            connection: Mutex::new(None),
            items: RwLock::new(Vec::new()),
        }
    }

    fn items(&self) -> Vec<S7Item> {
        self.items.read().map(|i| i.clone()).unwrap_or_default()
    }

    async fn handshake(endpoint: &S7Endpoint) -> Result<Connection, DomainError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| {
                DomainError::ConnectionFailure(format!(
                    "{}:{}: {}",
                    endpoint.host, endpoint.port, e
                ))
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on S7 socket: {}", e);
        }

        let mut connection = Connection {
            stream,
            pdu_size: wire::REQUESTED_PDU,
            pdu_ref: 0,
        };
        let confirm = connection
            .send(&wire::connect_request(endpoint.rack, endpoint.slot))
            .await?;
        wire::check_connect_confirm(&confirm)?;

        let setup = connection.exchange(wire::setup_request).await?;
        connection.pdu_size = wire::parse_setup_response(&setup)?;
        Ok(connection)
    }

    async fn read_batches(
        connection: &mut Connection,
        items: &[S7Item],
    ) -> Result<Vec<(String, Value)>, DomainError> {
        let mut values = Vec::with_capacity(items.len());
        for batch in wire::plan_reads(items, connection.pdu_size) {
            let batch = &items[batch];
            let addresses: Vec<_> = batch.iter().map(|i| &i.address).collect();
            let reply = connection
                .exchange(|pdu_ref| wire::read_request(pdu_ref, &addresses))
                .await?;

            for (item, raw) in batch.iter().zip(wire::parse_read_response(&reply, batch.len())?) {
                match raw.map(|bytes| wire::decode(item.address.kind, &bytes)) {
                    Some(Ok(value)) => values.push((item.name.clone(), value)),
                    Some(Err(e)) => warn!(tag = %item.name, "Undecodable S7 value: {}", e),
                    None => warn!(tag = %item.name, "PLC refused S7 item"),
                }
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl S7Transport for IsoTcpS7 {
    async fn connect(&self, endpoint: &S7Endpoint) -> Result<(), DomainError> {
        let mut slot = self.connection.lock().await;
        if let Some(mut previous) = slot.take() {
            let _ = previous.stream.shutdown().await;
        }

        let connection = Self::handshake(endpoint).await.map_err(|e| match e {
            DomainError::ConnectionFailure(_) => e,
            other => DomainError::ConnectionFailure(other.to_string()),
        })?;
        info!(
            host = %endpoint.host,
            pdu_size = connection.pdu_size,
            "S7 session established"
        );
        *slot = Some(connection);
        if let Ok(mut items) = self.items.write() {
            items.clear();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.stream.shutdown().await {
                debug!("S7 socket shutdown: {}", e);
            }
        }
        if let Ok(mut items) = self.items.write() {
            items.clear();
        }
        Ok(())
    }

    async fn register_items(&self, items: &[S7Item]) -> Result<(), DomainError> {
        if self.connection.lock().await.is_none() {
            return Err(DomainError::NotConnected);
        }
        if let Ok(mut registered) = self.items.write() {
            *registered = items.to_vec();
        }
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<(), DomainError> {
        if let Ok(mut registered) = self.items.write() {
            registered.retain(|i| i.name != name);
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<(String, Value)>, DomainError> {
        let items = self.items();
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or(DomainError::NotConnected)?;

        let result = Self::read_batches(connection, &items).await;
        if let Err(DomainError::DriverError(reason)) = &result {
            if reason.starts_with("S7 socket error") {
                // The stream is out of sync or gone; the next connect starts over.
                *slot = None;
            }
        }
        result
    }

    async fn write_item(&self, item: &S7Item, value: &WireValue) -> Result<(), DomainError> {
        let payload = wire::encode(item.address.kind, value)?;
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or(DomainError::NotConnected)?;

        let reply = connection
            .exchange(|pdu_ref| wire::write_request(pdu_ref, &item.address, &payload))
            .await?;
        wire::parse_write_response(&reply)
    }
}
