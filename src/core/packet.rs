//! Fixed 16-byte RNP header and whole-packet framing.
//!
//! ```text
//! 0      1        3       5          7          11          15        16
//! +------+--------+-------+----------+----------+-----------+---------+
//! | type | length | flags | reserved | sequence | sessionId | padding |
//! +------+--------+-------+----------+----------+-----------+---------+
//! ```
//!
//! All multi-byte fields are big-endian. The functions here are pure transforms
//! over byte buffers; the type byte is passed through unvalidated so callers
//! decide what to do with packet kinds they do not know.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum payload carried by a single datagram.
pub const MAX_PAYLOAD: usize = 512;

/// Packet kinds understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Connect = 0x01,
    Disconnect = 0x02,
    WorldState = 0x03,
    Ping = 0x04,
    Pong = 0x05,
    Error = 0x06,
    Ack = 0x07,
    EntityEvent = 0x08,
    ConnectAccept = 0x09,
}

impl PacketType {
    /// Every known packet type, in code order.
    pub const ALL: [PacketType; 9] = [
        PacketType::Connect,
        PacketType::Disconnect,
        PacketType::WorldState,
        PacketType::Ping,
        PacketType::Pong,
        PacketType::Error,
        PacketType::Ack,
        PacketType::EntityEvent,
        PacketType::ConnectAccept,
    ];

    /// Map a wire byte to a packet type, `None` for unknown codes.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketType::Connect),
            0x02 => Some(PacketType::Disconnect),
            0x03 => Some(PacketType::WorldState),
            0x04 => Some(PacketType::Ping),
            0x05 => Some(PacketType::Pong),
            0x06 => Some(PacketType::Error),
            0x07 => Some(PacketType::Ack),
            0x08 => Some(PacketType::EntityEvent),
            0x09 => Some(PacketType::ConnectAccept),
            _ => None,
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Upper-case wire name, used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::WorldState => "WORLD_STATE",
            PacketType::Ping => "PING",
            PacketType::Pong => "PONG",
            PacketType::Error => "ERROR",
            PacketType::Ack => "ACK",
            PacketType::EntityEvent => "ENTITY_EVENT",
            PacketType::ConnectAccept => "CONNECT_ACCEPT",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self> {
        Self::from_byte(byte).ok_or(ProtocolError::UnknownPacketType(byte))
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Header flag bits (16 bits on the wire).
    ///
    /// Unknown bits are retained so a header survives a decode/encode cycle
    /// untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PacketFlags: u16 {
        /// Receiver must answer with an ACK
        const ACK_REQ = 0x0001;
        /// Sender keeps the packet until it is acknowledged
        const RELIABLE = 0x0002;
        /// Part of a fragmented message
        const FRAG = 0x0004;
        /// Payload is compressed
        const COMPRESSED = 0x0008;
    }
}

impl Default for PacketFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Decoded form of the 16-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Raw type byte; see [`PacketHeader::kind`].
    pub packet_type: u8,
    pub length: u16,
    pub flags: PacketFlags,
    pub reserved: u16,
    pub sequence: u32,
    pub session_id: u32,
}

impl PacketHeader {
    /// Header for a packet of `packet_type` carrying `length` payload bytes.
    pub fn new(
        packet_type: PacketType,
        flags: PacketFlags,
        sequence: u32,
        session_id: u32,
        length: u16,
    ) -> Self {
        Self {
            packet_type: packet_type.as_byte(),
            length,
            flags,
            reserved: 0,
            sequence,
            session_id,
        }
    }

    /// Known packet type, or `None` if the type byte is not recognised.
    #[inline]
    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_byte(self.packet_type)
    }

    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    #[inline]
    pub fn wants_ack(&self) -> bool {
        self.flags.contains(PacketFlags::ACK_REQ)
    }
}

/// Encode a header into its 16-byte wire form. The padding byte is always 0.
pub fn encode_header(header: &PacketHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0] = header.packet_type;
    out[1..3].copy_from_slice(&header.length.to_be_bytes());
    out[3..5].copy_from_slice(&header.flags.bits().to_be_bytes());
    out[5..7].copy_from_slice(&header.reserved.to_be_bytes());
    out[7..11].copy_from_slice(&header.sequence.to_be_bytes());
    out[11..15].copy_from_slice(&header.session_id.to_be_bytes());
    out
}

/// Decode the first 16 bytes of `buf` as a header.
///
/// # Errors
/// Returns `ProtocolError::TruncatedHeader` if `buf` holds fewer than 16 bytes.
/// The declared payload length is not checked against the buffer here.
pub fn decode_header(buf: &[u8]) -> Result<PacketHeader> {
    if buf.len() < HEADER_SIZE {
        return Err(ProtocolError::TruncatedHeader { actual: buf.len() });
    }

    Ok(PacketHeader {
        packet_type: buf[0],
        length: u16::from_be_bytes([buf[1], buf[2]]),
        flags: PacketFlags::from_bits_retain(u16::from_be_bytes([buf[3], buf[4]])),
        reserved: u16::from_be_bytes([buf[5], buf[6]]),
        sequence: u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]),
        session_id: u32::from_be_bytes([buf[11], buf[12], buf[13], buf[14]]),
    })
}

/// Header bytes followed by `payload`, which is only appended when it is
/// non-empty and the header declares a non-zero length.
pub fn encode(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&encode_header(header));
    if !payload.is_empty() && header.length > 0 {
        out.extend_from_slice(payload);
    }
    out
}

/// Lenient payload extraction used by the receive path: exactly
/// `header.length` bytes after the header when the datagram is long enough,
/// otherwise an empty slice.
pub fn payload_slice<'a>(header: &PacketHeader, datagram: &'a [u8]) -> &'a [u8] {
    let end = HEADER_SIZE + header.length as usize;
    if header.length > 0 && datagram.len() >= end {
        &datagram[HEADER_SIZE..end]
    } else {
        &[]
    }
}

/// A header together with its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, filling in `length` from the payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::PayloadTooLarge` if the payload does not fit the
    /// 16-bit length field.
    pub fn new(
        packet_type: PacketType,
        flags: PacketFlags,
        sequence: u32,
        session_id: u32,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let length =
            u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
        Ok(Self {
            header: PacketHeader::new(packet_type, flags, sequence, session_id, length),
            payload,
        })
    }

    /// Serialize header and payload into a single datagram.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.header, &self.payload)
    }

    /// Strict decode: the buffer must contain the full declared payload.
    /// Trailing bytes beyond `16 + length` are ignored.
    ///
    /// # Errors
    /// `TruncatedHeader` for fewer than 16 bytes, `TruncatedPayload` when the
    /// buffer is shorter than `16 + length`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = decode_header(buf)?;
        let declared = header.length as usize;
        let available = buf.len() - HEADER_SIZE;
        if available < declared {
            return Err(ProtocolError::TruncatedPayload {
                declared,
                available,
            });
        }

        Ok(Self {
            header,
            payload: buf[HEADER_SIZE..HEADER_SIZE + declared].to_vec(),
        })
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian_at_fixed_offsets() {
        let header = PacketHeader {
            packet_type: PacketType::Ping.as_byte(),
            length: 0x0102,
            flags: PacketFlags::ACK_REQ | PacketFlags::RELIABLE,
            reserved: 0,
            sequence: 0x0A0B_0C0D,
            session_id: 0x1122_3344,
        };

        let bytes = encode_header(&header);
        assert_eq!(
            bytes,
            [
                0x04, 0x01, 0x02, 0x00, 0x03, 0x00, 0x00, 0x0A, 0x0B, 0x0C, 0x0D, 0x11, 0x22, 0x33,
                0x44, 0x00
            ]
        );
        assert_eq!(decode_header(&bytes).unwrap(), header);
    }

    #[test]
    fn short_buffer_is_truncated_header() {
        for len in 0..HEADER_SIZE {
            let err = decode_header(&vec![0u8; len]).unwrap_err();
            assert!(matches!(err, ProtocolError::TruncatedHeader { actual } if actual == len));
        }
    }

    #[test]
    fn unknown_type_passes_through() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = 0xEE;
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.packet_type, 0xEE);
        assert_eq!(header.kind(), None);
    }

    #[test]
    fn padding_byte_is_ignored_on_decode() {
        let header = PacketHeader::new(PacketType::Ack, PacketFlags::empty(), 3, 4, 0);
        let mut bytes = encode_header(&header);
        bytes[15] = 0xFF;
        assert_eq!(decode_header(&bytes).unwrap(), header);
    }

    #[test]
    fn encode_skips_payload_when_length_is_zero() {
        let header = PacketHeader::new(PacketType::Ping, PacketFlags::empty(), 0, 0, 0);
        assert_eq!(encode(&header, &[1, 2, 3]).len(), HEADER_SIZE);

        let header = PacketHeader::new(PacketType::Ping, PacketFlags::empty(), 0, 0, 3);
        assert_eq!(encode(&header, &[1, 2, 3]).len(), HEADER_SIZE + 3);
        assert_eq!(encode(&header, &[]).len(), HEADER_SIZE);
    }

    #[test]
    fn strict_decode_rejects_short_payload() {
        let packet = Packet::new(
            PacketType::EntityEvent,
            PacketFlags::RELIABLE,
            9,
            7,
            vec![0xAB; 20],
        )
        .unwrap();
        let bytes = packet.to_bytes();

        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);

        let err = Packet::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedPayload {
                declared: 20,
                available: 19
            }
        ));
    }

    #[test]
    fn lenient_payload_slice_is_empty_when_short() {
        let header = PacketHeader::new(PacketType::Ping, PacketFlags::empty(), 0, 0, 8);
        let full = encode(&header, &[7u8; 8]);
        assert_eq!(payload_slice(&header, &full), &[7u8; 8]);
        assert!(payload_slice(&header, &full[..20]).is_empty());
    }

    #[test]
    fn unknown_flag_bits_survive() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[3] = 0x80;
        bytes[4] = 0x01;
        let header = decode_header(&bytes).unwrap();
        assert!(header.wants_ack());
        assert_eq!(encode_header(&header), bytes);
    }
}
