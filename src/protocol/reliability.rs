//! Sequence numbering, pending reliable sends and selective acknowledgement.
//!
//! One tracker belongs to one session direction: the client owns one for its
//! connection to the server, the server owns one per connected client. It
//! never touches the network itself; the engine asks it for sequence numbers,
//! hands it encoded reliable packets, feeds it incoming ACKs and asks it what
//! to resend.
//!
//! Sequence numbers wrap silently at 2^32. Acks that arrive after a wrap can
//! match a newer packet with the same number; this is a known limitation.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::trace;

use crate::core::packet::PacketHeader;
use crate::protocol::message::AckPayload;

/// Number of selective-ack bits carried next to the cumulative ack.
pub const SACK_BITS: u32 = 32;

#[derive(Debug, Default)]
pub struct ReliabilityTracker {
    next_sequence: u32,
    pending: BTreeMap<u32, Bytes>,
    highest_received: Option<u32>,
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next outbound sequence number: 0, 1, 2, ... wrapping at 2^32.
    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    /// Sequence number the next call to [`next_sequence`](Self::next_sequence)
    /// will return.
    pub fn peek_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Keep the encoded bytes of a RELIABLE packet until it is acknowledged.
    pub fn record_pending(&mut self, sequence: u32, encoded: impl Into<Bytes>) {
        self.pending.insert(sequence, encoded.into());
    }

    /// Drop every pending entry covered by an ACK: `cumulative` itself and
    /// `cumulative - i - 1` for each set bit `i`. Returns how many entries were
    /// removed; sequences that are not pending are ignored.
    pub fn on_ack(&mut self, cumulative: u32, sack_bits: u32) -> usize {
        let mut removed = usize::from(self.pending.remove(&cumulative).is_some());

        for bit in 0..SACK_BITS {
            if sack_bits & (1 << bit) == 0 {
                continue;
            }
            let sequence = cumulative.wrapping_sub(bit).wrapping_sub(1);
            if self.pending.remove(&sequence).is_some() {
                removed += 1;
            }
        }

        trace!(
            cumulative,
            sack_bits,
            removed,
            pending = self.pending.len(),
            "ack applied"
        );
        removed
    }

    /// Every still-pending packet, verbatim, in sequence order. Entries stay
    /// pending; there is no backoff and no give-up limit.
    pub fn retransmit_all(&self) -> Vec<Bytes> {
        self.pending.values().cloned().collect()
    }

    /// ACK owed for an incoming packet: one carrying ACK_REQ is acknowledged
    /// with its own sequence as the cumulative value and an empty bitmap.
    pub fn ack_for(incoming: &PacketHeader) -> Option<AckPayload> {
        incoming.wants_ack().then_some(AckPayload {
            cumulative: incoming.sequence,
            ack_bits: 0,
        })
    }

    /// Bookkeeping for an incoming RELIABLE packet. "Higher" is judged with
    /// wrapping arithmetic, so the mark follows the peer across 2^32.
    pub fn note_received(&mut self, sequence: u32) {
        self.highest_received = Some(match self.highest_received {
            Some(highest) if !sequence_newer(sequence, highest) => highest,
            _ => sequence,
        });
    }

    /// Highest reliable sequence seen from the peer.
    pub fn highest_received(&self) -> Option<u32> {
        self.highest_received
    }

    pub fn is_pending(&self, sequence: u32) -> bool {
        self.pending.contains_key(&sequence)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Whether `a` comes after `b` in wrapping sequence space.
fn sequence_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 1 << 31
}
