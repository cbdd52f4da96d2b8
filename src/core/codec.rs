//! tokio-util framing for RNP datagrams.
//!
//! Each UDP datagram carries exactly one packet, so the decoder only ever has
//! to wait for `16 + length` bytes. The same codec plugs into
//! `tokio_util::udp::UdpFramed` for tools and tests that want a stream of
//! packets instead of raw buffers.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{decode_header, encode_header, Packet, HEADER_SIZE, MAX_PAYLOAD};
use crate::error::{ProtocolError, Result};

/// Packet codec bounded by a maximum payload size.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload: usize,
}

impl PacketCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = decode_header(&src[..])?;
        let length = header.length as usize;
        if length > self.max_payload {
            // Skip the whole frame so the stream stays usable after the error.
            src.advance(src.len().min(HEADER_SIZE + length));
            return Err(ProtocolError::PayloadTooLarge(length));
        }

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).to_vec();
        Ok(Some(Packet { header, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        if packet.payload.len() > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge(packet.payload.len()));
        }

        dst.reserve(packet.encoded_len());
        dst.put_slice(&encode_header(&packet.header));
        if packet.header.length > 0 {
            dst.put_slice(&packet.payload);
        }
        Ok(())
    }
}
