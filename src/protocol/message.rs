//! Typed payloads for every RNP packet kind.
//!
//! [`Message`] is the closed set of packets the protocol knows about. Each
//! variant knows its [`PacketType`] and how to turn itself into payload bytes;
//! [`Message::decode`] goes the other way given a type and a payload slice.
//! Every decoder checks lengths before slicing, so arbitrary input produces an
//! error rather than a panic.

use serde::{Deserialize, Serialize};

use crate::core::event::EntityEvents;
use crate::core::packet::{PacketType, MAX_PAYLOAD};
use crate::error::{constants, ProtocolError, Result};

/// Longest player name carried by CONNECT, in bytes.
pub const MAX_NAME_LEN: usize = 31;

/// Size of one entity entry inside WORLD_STATE.
pub const ENTITY_STATE_SIZE: usize = 23;

/// Minimum CONNECT_ACCEPT payload size.
pub const CONNECT_ACCEPT_SIZE: usize = 12;

/// Longest ERROR text that fits next to the code and length fields.
pub const MAX_ERROR_TEXT: usize = MAX_PAYLOAD - 4;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DisconnectReason {
    Unspecified = 0,
    ClientRequest = 1,
    Timeout = 2,
    ProtocolError = 3,
    ServerShutdown = 4,
    ServerFull = 5,
    Banned = 6,
}

impl DisconnectReason {
    /// Unknown codes are treated as `Unspecified`.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => DisconnectReason::ClientRequest,
            2 => DisconnectReason::Timeout,
            3 => DisconnectReason::ProtocolError,
            4 => DisconnectReason::ServerShutdown,
            5 => DisconnectReason::ServerFull,
            6 => DisconnectReason::Banned,
            _ => DisconnectReason::Unspecified,
        }
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Error codes carried by ERROR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    InvalidPayload = 1,
    UnauthorizedSession = 2,
    RateLimited = 3,
    InternalError = 4,
}

impl ErrorCode {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::InvalidPayload),
            2 => Some(ErrorCode::UnauthorizedSession),
            3 => Some(ErrorCode::RateLimited),
            4 => Some(ErrorCode::InternalError),
            _ => None,
        }
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Parameters the server hands out in CONNECT_ACCEPT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAccept {
    pub session_id: u32,
    pub tick_rate_hz: u16,
    pub mtu_payload_bytes: u16,
    pub server_caps: u32,
}

impl ConnectAccept {
    /// # Errors
    /// `InvalidConnectAccept` when fewer than 12 bytes are present. Extra
    /// trailing bytes are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < CONNECT_ACCEPT_SIZE {
            return Err(ProtocolError::InvalidConnectAccept(payload.len()));
        }
        Ok(Self {
            session_id: read_u32(payload, 0),
            tick_rate_hz: read_u16(payload, 4),
            mtu_payload_bytes: read_u16(payload, 6),
            server_caps: read_u32(payload, 8),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONNECT_ACCEPT_SIZE);
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&self.tick_rate_hz.to_be_bytes());
        out.extend_from_slice(&self.mtu_payload_bytes.to_be_bytes());
        out.extend_from_slice(&self.server_caps.to_be_bytes());
        out
    }
}

/// PING and PONG share the same body; PONG echoes the PING verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    pub nonce: u32,
    pub send_time_ms: u32,
}

/// Cumulative acknowledgement plus a 32-bit selective-ack bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AckPayload {
    pub cumulative: u32,
    pub ack_bits: u32,
}

/// One entity entry inside WORLD_STATE.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    pub id: u32,
    pub entity_type: u16,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub state_flags: u8,
}

impl EntityState {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.entity_type.to_be_bytes());
        out.extend_from_slice(&self.x.to_bits().to_be_bytes());
        out.extend_from_slice(&self.y.to_bits().to_be_bytes());
        out.extend_from_slice(&self.vx.to_bits().to_be_bytes());
        out.extend_from_slice(&self.vy.to_bits().to_be_bytes());
        out.push(self.state_flags);
    }

    fn read(buf: &[u8]) -> Self {
        Self {
            id: read_u32(buf, 0),
            entity_type: read_u16(buf, 4),
            x: f32::from_bits(read_u32(buf, 6)),
            y: f32::from_bits(read_u32(buf, 10)),
            vx: f32::from_bits(read_u32(buf, 14)),
            vy: f32::from_bits(read_u32(buf, 18)),
            state_flags: buf[22],
        }
    }
}

/// Snapshot of the world at a server tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldState {
    pub server_tick: u32,
    pub entities: Vec<EntityState>,
}

impl WorldState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let count = u16::try_from(self.entities.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(self.entities.len() * ENTITY_STATE_SIZE))?;
        let mut out = Vec::with_capacity(6 + self.entities.len() * ENTITY_STATE_SIZE);
        out.extend_from_slice(&self.server_tick.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        for entity in &self.entities {
            entity.write(&mut out);
        }
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let invalid = ProtocolError::InvalidPayload {
            packet: "WORLD_STATE",
            reason: constants::ERR_WORLD_STATE_TOO_SHORT,
        };
        if payload.len() < 6 {
            return Err(invalid);
        }
        let server_tick = read_u32(payload, 0);
        let count = read_u16(payload, 4) as usize;
        let body = &payload[6..];
        if body.len() < count * ENTITY_STATE_SIZE {
            return Err(invalid);
        }

        let entities = body
            .chunks_exact(ENTITY_STATE_SIZE)
            .take(count)
            .map(EntityState::read)
            .collect();
        Ok(Self {
            server_tick,
            entities,
        })
    }
}

/// Every packet body the protocol can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Connect { name: String, client_caps: u32 },
    ConnectAccept(ConnectAccept),
    Disconnect { reason: DisconnectReason },
    WorldState(WorldState),
    Ping(PingPayload),
    Pong(PingPayload),
    Error { code: ErrorCode, message: String },
    Ack(AckPayload),
    EntityEvent(EntityEvents),
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Message::Connect { .. } => PacketType::Connect,
            Message::ConnectAccept(_) => PacketType::ConnectAccept,
            Message::Disconnect { .. } => PacketType::Disconnect,
            Message::WorldState(_) => PacketType::WorldState,
            Message::Ping(_) => PacketType::Ping,
            Message::Pong(_) => PacketType::Pong,
            Message::Error { .. } => PacketType::Error,
            Message::Ack(_) => PacketType::Ack,
            Message::EntityEvent(_) => PacketType::EntityEvent,
        }
    }

    /// Build an ERROR message. On encode the text is cut on a char boundary
    /// to [`MAX_ERROR_TEXT`] bytes so the payload always fits.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            code,
            message: message.into(),
        }
    }

    /// Serialize the payload (header not included).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Message::Connect { name, client_caps } => {
                let name = truncate_name(name);
                let mut out = Vec::with_capacity(1 + name.len() + 4);
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(&client_caps.to_be_bytes());
                Ok(out)
            }
            Message::ConnectAccept(accept) => Ok(accept.encode()),
            Message::Disconnect { reason } => Ok(reason.code().to_be_bytes().to_vec()),
            Message::WorldState(world) => world.encode(),
            Message::Ping(ping) | Message::Pong(ping) => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&ping.nonce.to_be_bytes());
                out.extend_from_slice(&ping.send_time_ms.to_be_bytes());
                Ok(out)
            }
            Message::Error { code, message } => {
                let text = truncate_to(message, MAX_ERROR_TEXT).as_bytes();
                let mut out = Vec::with_capacity(4 + text.len());
                out.extend_from_slice(&code.code().to_be_bytes());
                out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                out.extend_from_slice(text);
                Ok(out)
            }
            Message::Ack(ack) => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&ack.cumulative.to_be_bytes());
                out.extend_from_slice(&ack.ack_bits.to_be_bytes());
                Ok(out)
            }
            Message::EntityEvent(batch) => batch.encode(),
        }
    }

    /// Parse a payload of the given type.
    pub fn decode(packet_type: PacketType, payload: &[u8]) -> Result<Self> {
        match packet_type {
            PacketType::Connect => {
                let too_short = || ProtocolError::InvalidPayload {
                    packet: "CONNECT",
                    reason: constants::ERR_CONNECT_TOO_SHORT,
                };
                let name_len = *payload.first().ok_or_else(too_short)? as usize;
                if payload.len() < 1 + name_len + 4 {
                    return Err(too_short());
                }
                let name = String::from_utf8_lossy(&payload[1..1 + name_len]).into_owned();
                let client_caps = read_u32(payload, 1 + name_len);
                Ok(Message::Connect { name, client_caps })
            }
            PacketType::ConnectAccept => ConnectAccept::decode(payload).map(Message::ConnectAccept),
            PacketType::Disconnect => {
                if payload.len() < 2 {
                    return Err(ProtocolError::InvalidPayload {
                        packet: "DISCONNECT",
                        reason: constants::ERR_DISCONNECT_TOO_SHORT,
                    });
                }
                Ok(Message::Disconnect {
                    reason: DisconnectReason::from_code(read_u16(payload, 0)),
                })
            }
            PacketType::WorldState => WorldState::decode(payload).map(Message::WorldState),
            PacketType::Ping | PacketType::Pong => {
                if payload.len() < 8 {
                    return Err(ProtocolError::InvalidPayload {
                        packet: packet_type.name(),
                        reason: constants::ERR_PING_TOO_SHORT,
                    });
                }
                let ping = PingPayload {
                    nonce: read_u32(payload, 0),
                    send_time_ms: read_u32(payload, 4),
                };
                Ok(if packet_type == PacketType::Ping {
                    Message::Ping(ping)
                } else {
                    Message::Pong(ping)
                })
            }
            PacketType::Error => {
                let too_short = ProtocolError::InvalidPayload {
                    packet: "ERROR",
                    reason: constants::ERR_ERROR_TOO_SHORT,
                };
                if payload.len() < 4 {
                    return Err(too_short);
                }
                let code = ErrorCode::from_code(read_u16(payload, 0)).ok_or(
                    ProtocolError::InvalidPayload {
                        packet: "ERROR",
                        reason: constants::ERR_UNKNOWN_ERROR_CODE,
                    },
                )?;
                let msg_len = read_u16(payload, 2) as usize;
                if payload.len() < 4 + msg_len {
                    return Err(too_short);
                }
                let message = String::from_utf8_lossy(&payload[4..4 + msg_len]).into_owned();
                Ok(Message::Error { code, message })
            }
            PacketType::Ack => {
                if payload.len() < 8 {
                    return Err(ProtocolError::InvalidPayload {
                        packet: "ACK",
                        reason: constants::ERR_ACK_TOO_SHORT,
                    });
                }
                Ok(Message::Ack(AckPayload {
                    cumulative: read_u32(payload, 0),
                    ack_bits: read_u32(payload, 4),
                }))
            }
            PacketType::EntityEvent => EntityEvents::decode(payload).map(Message::EntityEvent),
        }
    }
}

/// Cut a name to at most [`MAX_NAME_LEN`] bytes on a char boundary.
pub fn truncate_name(name: &str) -> &str {
    truncate_to(name, MAX_NAME_LEN)
}

fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[inline]
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
