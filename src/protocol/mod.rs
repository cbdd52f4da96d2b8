//! # Protocol Layer
//!
//! Typed messages, session handshake, reliability bookkeeping and handler
//! dispatch. Everything here is synchronous state; the transport layer drives
//! it from the I/O thread.

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod reliability;


use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::core::codec::PacketCodec;
use crate::core::packet::{Packet, PacketFlags, PacketType};
use crate::error::Result;
use crate::protocol::reliability::ReliabilityTracker;

/// Frame an already-encoded payload with the tracker's next sequence number.
///
/// RELIABLE packets are recorded as pending in the same tracker before the
/// bytes are returned, so a send and its retransmission copy never diverge.
pub fn stamp(
    tracker: &mut ReliabilityTracker,
    packet_type: PacketType,
    payload: &[u8],
    flags: PacketFlags,
    session_id: u32,
) -> Result<Bytes> {
    let sequence = tracker.next_sequence();
    let packet = Packet::new(packet_type, flags, sequence, session_id, payload.to_vec())?;

    let mut buf = BytesMut::with_capacity(packet.encoded_len());
    PacketCodec::default().encode(packet, &mut buf)?;
    let bytes = buf.freeze();

    if flags.contains(PacketFlags::RELIABLE) {
        tracker.record_pending(sequence, bytes.clone());
    }
    Ok(bytes)
}
