//! S7comm frames carried over ISO-on-TCP (TPKT + COTP).
//!
//! Frames handed to the `parse_*` functions are TPKT payloads, i.e. the
//! bytes following the 4-byte TPKT header.

use std::ops::Range;

use domain::DomainError;
use domain::coercion::WireValue;
use serde_json::{Value, json};

use super::{S7Address, S7Area, S7Item, S7Kind};

pub const TPKT_HEADER_LEN: usize = 4;
pub const TPKT_VERSION: u8 = 0x03;
/// PDU size proposed during setup; the PLC may answer with less.
pub const REQUESTED_PDU: u16 = 480;

const COTP_CONNECT_CONFIRM: u8 = 0xD0;
const COTP_DATA: [u8; 3] = [0x02, 0xF0, 0x80];
const PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const FN_SETUP: u8 = 0xF0;
const FN_READ: u8 = 0x04;
const FN_WRITE: u8 = 0x05;
const ITEM_OK: u8 = 0xFF;

const JOB_HEADER_LEN: usize = 10;
const ACK_HEADER_LEN: usize = 12;
const ITEM_SPEC_LEN: usize = 12;
const ITEM_DATA_HEADER_LEN: usize = 4;
const MAX_ITEMS_PER_REQUEST: usize = 20;

fn protocol_error(detail: impl std::fmt::Display) -> DomainError {
    DomainError::DriverError(format!("S7 protocol error: {}", detail))
}

fn truncated() -> DomainError {
    protocol_error("truncated frame")
}

pub fn tpkt(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + TPKT_HEADER_LEN) as u16;
    let mut frame = Vec::with_capacity(len as usize);
    frame.extend([TPKT_VERSION, 0x00]);
    frame.extend(len.to_be_bytes());
    frame.extend(payload);
    frame
}

/// COTP connection request addressed to the CPU at `rack`/`slot`.
pub fn connect_request(rack: u16, slot: u16) -> Vec<u8> {
    let remote_tsap = ((rack as u8 & 0x07) << 5) | (slot as u8 & 0x1F);
    tpkt(&[
        0x11, 0xE0, // length, CR
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // calling TSAP
        0xC2, 0x02, 0x01, remote_tsap, // called TSAP
    ])
}

pub fn check_connect_confirm(frame: &[u8]) -> Result<(), DomainError> {
    match frame.get(1) {
        Some(&COTP_CONNECT_CONFIRM) => Ok(()),
        Some(other) => Err(protocol_error(format!(
            "connection not confirmed (COTP {:#04x})",
            other
        ))),
        None => Err(truncated()),
    }
}

fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + JOB_HEADER_LEN + params.len() + data.len());
    payload.extend(COTP_DATA);
    payload.extend([PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
    payload.extend(pdu_ref.to_be_bytes());
    payload.extend((params.len() as u16).to_be_bytes());
    payload.extend((data.len() as u16).to_be_bytes());
    payload.extend(params);
    payload.extend(data);
    tpkt(&payload)
}

pub fn setup_request(pdu_ref: u16) -> Vec<u8> {
    let [hi, lo] = REQUESTED_PDU.to_be_bytes();
    job(pdu_ref, &[FN_SETUP, 0x00, 0x00, 0x01, 0x00, 0x01, hi, lo], &[])
}

/// Checks an ack-data frame and splits it into `(params, data)`.
fn parse_ack(frame: &[u8]) -> Result<(&[u8], &[u8]), DomainError> {
    let s7 = frame.get(COTP_DATA.len()..).ok_or_else(truncated)?;
    if s7.len() < ACK_HEADER_LEN {
        return Err(truncated());
    }
    if s7[0] != PROTOCOL_ID {
        return Err(protocol_error(format!("unexpected protocol id {:#04x}", s7[0])));
    }
    if s7[1] != ROSCTR_ACK_DATA {
        return Err(protocol_error(format!("unexpected message type {:#04x}", s7[1])));
    }
    let (class, code) = (s7[10], s7[11]);
    if class != 0 || code != 0 {
        return Err(DomainError::DriverError(format!(
            "PLC rejected the request (class {:#04x}, code {:#04x})",
            class, code
        )));
    }

    let param_len = u16::from_be_bytes([s7[6], s7[7]]) as usize;
    let data_len = u16::from_be_bytes([s7[8], s7[9]]) as usize;
    let body = &s7[ACK_HEADER_LEN..];
    if body.len() < param_len + data_len {
        return Err(truncated());
    }
    Ok((&body[..param_len], &body[param_len..param_len + data_len]))
}

/// Negotiated PDU size.
pub fn parse_setup_response(frame: &[u8]) -> Result<u16, DomainError> {
    let (params, _) = parse_ack(frame)?;
    if params.len() < 8 || params[0] != FN_SETUP {
        return Err(protocol_error("malformed setup response"));
    }
    Ok(u16::from_be_bytes([params[6], params[7]]))
}

/// Bytes an item occupies in PLC memory.
pub fn byte_len(kind: S7Kind) -> usize {
    match kind {
        S7Kind::Bit(_) | S7Kind::Byte | S7Kind::Char => 1,
        S7Kind::Int | S7Kind::Word => 2,
        S7Kind::DInt | S7Kind::DWord | S7Kind::Real => 4,
        S7Kind::String(max) => max as usize + 2,
    }
}

fn area_code(area: S7Area) -> (u8, u16) {
    match area {
        S7Area::Input => (0x81, 0),
        S7Area::Output => (0x82, 0),
        S7Area::Merker => (0x83, 0),
        S7Area::DataBlock(db) => (0x84, db),
    }
}

fn item_spec(address: &S7Address) -> [u8; ITEM_SPEC_LEN] {
    let (area, db) = area_code(address.area);
    let (transport, count, start) = match address.kind {
        S7Kind::Bit(bit) => (0x01, 1u16, address.offset * 8 + bit as u32),
        kind => (0x02, byte_len(kind) as u16, address.offset * 8),
    };
    let [count_hi, count_lo] = count.to_be_bytes();
    let [db_hi, db_lo] = db.to_be_bytes();
    [
        0x12,
        0x0A,
        0x10,
        transport,
        count_hi,
        count_lo,
        db_hi,
        db_lo,
        area,
        (start >> 16) as u8,
        (start >> 8) as u8,
        start as u8,
    ]
}

pub fn read_request(pdu_ref: u16, addresses: &[&S7Address]) -> Vec<u8> {
    let mut params = Vec::with_capacity(2 + addresses.len() * ITEM_SPEC_LEN);
    params.extend([FN_READ, addresses.len() as u8]);
    for address in addresses {
        params.extend(item_spec(address));
    }
    job(pdu_ref, &params, &[])
}

/// Raw bytes per requested item, `None` where the PLC refused the item.
pub fn parse_read_response(
    frame: &[u8],
    expected: usize,
) -> Result<Vec<Option<Vec<u8>>>, DomainError> {
    let (params, data) = parse_ack(frame)?;
    if params.first() != Some(&FN_READ) {
        return Err(protocol_error("response is not a read"));
    }

    let mut items = Vec::with_capacity(expected);
    let mut pos = 0;
    for index in 0..expected {
        let header = data
            .get(pos..pos + ITEM_DATA_HEADER_LEN)
            .ok_or_else(truncated)?;
        let (code, transport) = (header[0], header[1]);
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        // BIT, BYTE/WORD/DWORD and INT report their length in bits.
        let bytes = match transport {
            0x03..=0x05 => len.div_ceil(8),
            _ => len,
        };
        pos += ITEM_DATA_HEADER_LEN;

        let payload = data.get(pos..pos + bytes).ok_or_else(truncated)?;
        pos += bytes;
        if bytes % 2 == 1 && index + 1 < expected {
            pos += 1;
        }
        items.push((code == ITEM_OK).then(|| payload.to_vec()));
    }
    Ok(items)
}

pub fn write_request(pdu_ref: u16, address: &S7Address, payload: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(2 + ITEM_SPEC_LEN);
    params.extend([FN_WRITE, 0x01]);
    params.extend(item_spec(address));

    let (transport, len) = match address.kind {
        S7Kind::Bit(_) => (0x03, 1u16),
        _ => (0x04, (payload.len() * 8) as u16),
    };
    let mut data = Vec::with_capacity(ITEM_DATA_HEADER_LEN + payload.len());
    data.extend([0x00, transport]);
    data.extend(len.to_be_bytes());
    data.extend(payload);
    job(pdu_ref, &params, &data)
}

pub fn parse_write_response(frame: &[u8]) -> Result<(), DomainError> {
    let (params, data) = parse_ack(frame)?;
    if params.first() != Some(&FN_WRITE) {
        return Err(protocol_error("response is not a write"));
    }
    match data.first() {
        Some(&ITEM_OK) => Ok(()),
        Some(code) => Err(DomainError::DriverError(format!(
            "Write rejected by PLC with return code {:#04x}",
            code
        ))),
        None => Err(truncated()),
    }
}

/// Splits `items` into read batches that fit the negotiated PDU both ways.
pub fn plan_reads(items: &[S7Item], pdu_size: u16) -> Vec<Range<usize>> {
    let pdu = pdu_size as usize;
    let mut batches = Vec::new();
    let mut start = 0;
    let mut request = JOB_HEADER_LEN + 2;
    let mut response = ACK_HEADER_LEN + 2;

    for (index, item) in items.iter().enumerate() {
        let item_response = ITEM_DATA_HEADER_LEN + byte_len(item.address.kind) + 1;
        let fits = index - start < MAX_ITEMS_PER_REQUEST
            && request + ITEM_SPEC_LEN <= pdu
            && response + item_response <= pdu;
        if !fits && index > start {
            batches.push(start..index);
            start = index;
            request = JOB_HEADER_LEN + 2;
            response = ACK_HEADER_LEN + 2;
        }
        request += ITEM_SPEC_LEN;
        response += item_response;
    }
    if start < items.len() {
        batches.push(start..items.len());
    }
    batches
}

pub fn decode(kind: S7Kind, bytes: &[u8]) -> Result<Value, DomainError> {
    if bytes.len() < byte_len(kind).min(2) {
        return Err(truncated());
    }
    let word = |b: &[u8]| -> Result<[u8; 2], DomainError> {
        b.get(..2)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(truncated)
    };
    let dword = |b: &[u8]| -> Result<[u8; 4], DomainError> {
        b.get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(truncated)
    };

    Ok(match kind {
        S7Kind::Bit(_) => json!(bytes[0] & 0x01 != 0),
        S7Kind::Byte => json!(bytes[0]),
        S7Kind::Char => json!((bytes[0] as char).to_string()),
        S7Kind::Int => json!(i16::from_be_bytes(word(bytes)?)),
        S7Kind::Word => json!(u16::from_be_bytes(word(bytes)?)),
        S7Kind::DInt => json!(i32::from_be_bytes(dword(bytes)?)),
        S7Kind::DWord => json!(u32::from_be_bytes(dword(bytes)?)),
        S7Kind::Real => json!(f32::from_be_bytes(dword(bytes)?) as f64),
        S7Kind::String(max) => {
            let actual = (bytes[1] as usize).min(max as usize);
            let text = bytes.get(2..2 + actual).ok_or_else(truncated)?;
            json!(String::from_utf8_lossy(text))
        }
    })
}

fn integer(value: &WireValue) -> Option<i128> {
    match value {
        WireValue::Int(i) => Some(*i as i128),
        WireValue::UInt(u) => Some(*u as i128),
        _ => None,
    }
}

/// Encodes a coerced value into the item's memory layout.
pub fn encode(kind: S7Kind, value: &WireValue) -> Result<Vec<u8>, DomainError> {
    let mismatch = || {
        DomainError::InvalidValue(format!(
            "{} cannot be stored as {}",
            value.to_json(),
            kind.wire_type()
        ))
    };
    let int = || integer(value).ok_or_else(mismatch);

    Ok(match kind {
        S7Kind::Bit(_) => match value {
            WireValue::Boolean(b) => vec![*b as u8],
            _ => return Err(mismatch()),
        },
        S7Kind::Byte => vec![u8::try_from(int()?).map_err(|_| mismatch())?],
        S7Kind::Int => i16::try_from(int()?)
            .map_err(|_| mismatch())?
            .to_be_bytes()
            .to_vec(),
        S7Kind::Word => u16::try_from(int()?)
            .map_err(|_| mismatch())?
            .to_be_bytes()
            .to_vec(),
        S7Kind::DInt => i32::try_from(int()?)
            .map_err(|_| mismatch())?
            .to_be_bytes()
            .to_vec(),
        S7Kind::DWord => u32::try_from(int()?)
            .map_err(|_| mismatch())?
            .to_be_bytes()
            .to_vec(),
        S7Kind::Real => match value {
            WireValue::Float(f) => f.to_be_bytes().to_vec(),
            WireValue::Double(f) => (*f as f32).to_be_bytes().to_vec(),
            _ => return Err(mismatch()),
        },
        S7Kind::Char => match value {
            WireValue::String(s) => vec![s.bytes().next().unwrap_or(b' ')],
            _ => return Err(mismatch()),
        },
        S7Kind::String(max) => match value {
            WireValue::String(s) => {
                let text: Vec<u8> = s.bytes().take(max as usize).collect();
                let mut out = Vec::with_capacity(text.len() + 2);
                out.extend([max.min(254) as u8, text.len() as u8]);
                out.extend(text);
                out
            }
            _ => return Err(mismatch()),
        },
    })
}
