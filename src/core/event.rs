//! Game-event records carried inside ENTITY_EVENT payloads.
//!
//! Each record is encoded as
//!
//! ```text
//! [type(1)] [entityId(4, BE)] [dataLen(1)] [data(dataLen)]
//! ```
//!
//! and a payload is a plain concatenation of records. Decoding must consume
//! the buffer exactly: a partial record at the end is a truncation error, never
//! a silent stop.

use serde::{Deserialize, Serialize};

use crate::core::packet::MAX_PAYLOAD;
use crate::error::{constants, ProtocolError, Result};

/// Bytes in a record before its data: type, entity id and data length.
pub const RECORD_HEAD_SIZE: usize = 6;

/// Largest data blob a single record can carry.
pub const MAX_EVENT_DATA: usize = u8::MAX as usize;

/// Size of the optional `serverTick | eventCount` prefix on ENTITY_EVENT.
pub const EVENT_BATCH_HEADER_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    Spawn = 0x01,
    Despawn = 0x02,
    Damage = 0x03,
    Score = 0x04,
    PowerUp = 0x05,
    Input = 0x06,
    Custom = 0x07,
}

impl EventType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(EventType::Spawn),
            0x02 => Some(EventType::Despawn),
            0x03 => Some(EventType::Damage),
            0x04 => Some(EventType::Score),
            0x05 => Some(EventType::PowerUp),
            0x06 => Some(EventType::Input),
            0x07 => Some(EventType::Custom),
            _ => None,
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One game event addressed to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: EventType,
    pub entity_id: u32,
    pub data: Vec<u8>,
}

impl EventRecord {
    pub fn new(event_type: EventType, entity_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type,
            entity_id,
            data: data.into(),
        }
    }

    /// Encoded size of this record.
    pub fn wire_len(&self) -> usize {
        RECORD_HEAD_SIZE + self.data.len()
    }
}

/// Concatenate the wire form of every record.
///
/// # Errors
/// `EventDataTooLarge` if a record carries more than 255 data bytes,
/// `PayloadTooLarge` once the running total exceeds [`MAX_PAYLOAD`].
pub fn serialize_events(records: &[EventRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_records(records, &mut out, MAX_PAYLOAD)?;
    Ok(out)
}

fn write_records(records: &[EventRecord], out: &mut Vec<u8>, limit: usize) -> Result<()> {
    for record in records {
        let data_len = u8::try_from(record.data.len())
            .map_err(|_| ProtocolError::EventDataTooLarge(record.data.len()))?;

        let total = out.len() + record.wire_len();
        if total > limit {
            return Err(ProtocolError::PayloadTooLarge(total));
        }

        out.push(record.event_type.as_byte());
        out.extend_from_slice(&record.entity_id.to_be_bytes());
        out.push(data_len);
        out.extend_from_slice(&record.data);
    }
    Ok(())
}

/// Parse a buffer of concatenated records.
///
/// # Errors
/// `TruncatedEvent` when a record head or its data overruns the buffer,
/// `InvalidPayload` for an unknown event type byte.
pub fn deserialize_events(buf: &[u8]) -> Result<Vec<EventRecord>> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < RECORD_HEAD_SIZE {
            return Err(ProtocolError::TruncatedEvent {
                offset,
                needed: RECORD_HEAD_SIZE,
                remaining,
            });
        }

        let head = &buf[offset..offset + RECORD_HEAD_SIZE];
        let event_type = EventType::from_byte(head[0]).ok_or(ProtocolError::InvalidPayload {
            packet: "ENTITY_EVENT",
            reason: constants::ERR_UNKNOWN_EVENT_TYPE,
        })?;
        let entity_id = u32::from_be_bytes([head[1], head[2], head[3], head[4]]);
        let data_len = head[5] as usize;

        let body_start = offset + RECORD_HEAD_SIZE;
        let body_remaining = buf.len() - body_start;
        if body_remaining < data_len {
            return Err(ProtocolError::TruncatedEvent {
                offset,
                needed: RECORD_HEAD_SIZE + data_len,
                remaining,
            });
        }

        records.push(EventRecord {
            event_type,
            entity_id,
            data: buf[body_start..body_start + data_len].to_vec(),
        });
        offset = body_start + data_len;
    }

    Ok(records)
}

/// ENTITY_EVENT payload: an optional batch header followed by TLV records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityEvents {
    /// Server tick from the batch header; `None` for headerless payloads.
    pub server_tick: Option<u32>,
    pub events: Vec<EventRecord>,
}

impl EntityEvents {
    pub fn new(server_tick: u32, events: Vec<EventRecord>) -> Self {
        Self {
            server_tick: Some(server_tick),
            events,
        }
    }

    /// Headerless batch, as older peers send it.
    pub fn legacy(events: Vec<EventRecord>) -> Self {
        Self {
            server_tick: None,
            events,
        }
    }

    /// Encode, prefixing `serverTick | eventCount` when a tick is set. The
    /// whole payload, prefix included, must fit in [`MAX_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(tick) = self.server_tick {
            let count = u16::try_from(self.events.len())
                .map_err(|_| ProtocolError::PayloadTooLarge(self.events.len()))?;
            out.extend_from_slice(&tick.to_be_bytes());
            out.extend_from_slice(&count.to_be_bytes());
        }
        write_records(&self.events, &mut out, MAX_PAYLOAD)?;
        Ok(out)
    }

    /// Decode an ENTITY_EVENT payload.
    ///
    /// Payloads shorter than the batch header are headerless TLV. Longer ones
    /// are read with the header when the remainder decodes to exactly
    /// `eventCount` records; anything else falls back to headerless TLV over
    /// the whole buffer.
    ///
    /// An empty header reading loses to a headerless reading that yields
    /// records: a lone record with no data and an entity id ending in `0x00`
    /// (`06 00 00 01 00 00`) looks like `tick | count = 0`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() >= EVENT_BATCH_HEADER_SIZE {
            let tick = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let count = u16::from_be_bytes([payload[4], payload[5]]) as usize;
            if let Ok(events) = deserialize_events(&payload[EVENT_BATCH_HEADER_SIZE..]) {
                if events.len() == count {
                    if count == 0 {
                        if let Ok(legacy) = deserialize_events(payload) {
                            if !legacy.is_empty() {
                                return Ok(Self::legacy(legacy));
                            }
                        }
                    }
                    return Ok(Self::new(tick, events));
                }
            }
        }

        deserialize_events(payload).map(Self::legacy)
    }
}
