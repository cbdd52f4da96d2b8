//! Observability and Metrics
//!
//! Process-wide counters for datagram traffic, decode failures, session
//! lifecycle and reliability activity.
//!
//! Uses atomic counters for thread-safe metrics collection; every engine in
//! the process reports into the same global instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams handed to the socket
    pub datagrams_sent: AtomicU64,
    /// Datagrams read from the socket
    pub datagrams_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Header or payload decode failures
    pub decode_errors: AtomicU64,
    /// Packets dropped for carrying the wrong session id or source
    pub session_drops: AtomicU64,
    /// Packets of an unknown type
    pub unknown_packets: AtomicU64,
    /// Reliable packets resent
    pub retransmits: AtomicU64,
    /// ACKs sent
    pub acks_sent: AtomicU64,
    /// ACKs received
    pub acks_received: AtomicU64,
    /// Pending entries cleared by received ACKs
    pub packets_acked: AtomicU64,
    /// CONNECTs sent or received
    pub handshakes_total: AtomicU64,
    /// Sessions established
    pub handshakes_success: AtomicU64,
    /// Clients currently in server session tables
    pub clients_active: AtomicU64,
    /// Events dropped because the application queue was full
    pub events_dropped: AtomicU64,
    /// Socket send/receive failures
    pub socket_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            session_drops: AtomicU64::new(0),
            unknown_packets: AtomicU64::new(0),
            retransmits: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            packets_acked: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            clients_active: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            socket_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn datagram_sent(&self, byte_count: u64) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_drop(&self) {
        self.session_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_packet(&self) {
        self.unknown_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmitted(&self, count: u64) {
        self.retransmits.fetch_add(count, Ordering::Relaxed);
    }

    pub fn ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a received ACK and how many pending entries it cleared
    pub fn ack_received(&self, cleared: u64) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
        self.packets_acked.fetch_add(cleared, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_added(&self) {
        self.clients_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn clients_removed(&self, count: u64) {
        let _ = self
            .clients_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
                Some(active.saturating_sub(count))
            });
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn socket_error(&self) {
        self.socket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            session_drops: self.session_drops.load(Ordering::Relaxed),
            unknown_packets: self.unknown_packets.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            packets_acked: self.packets_acked.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            clients_active: self.clients_active.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            socket_errors: self.socket_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            datagrams_sent = snapshot.datagrams_sent,
            datagrams_received = snapshot.datagrams_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            decode_errors = snapshot.decode_errors,
            session_drops = snapshot.session_drops,
            unknown_packets = snapshot.unknown_packets,
            retransmits = snapshot.retransmits,
            acks_sent = snapshot.acks_sent,
            acks_received = snapshot.acks_received,
            packets_acked = snapshot.packets_acked,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            clients_active = snapshot.clients_active,
            events_dropped = snapshot.events_dropped,
            socket_errors = snapshot.socket_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub decode_errors: u64,
    pub session_drops: u64,
    pub unknown_packets: u64,
    pub retransmits: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub packets_acked: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub clients_active: u64,
    pub events_dropped: u64,
    pub socket_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.datagram_sent(20);
        metrics.datagram_sent(30);
        metrics.ack_received(3);
        metrics.decode_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.datagrams_sent, 2);
        assert_eq!(snapshot.bytes_sent, 50);
        assert_eq!(snapshot.acks_received, 1);
        assert_eq!(snapshot.packets_acked, 3);
        assert_eq!(snapshot.decode_errors, 1);
    }

    #[test]
    fn client_gauge_never_underflows() {
        let metrics = Metrics::new();
        metrics.client_added();
        metrics.clients_removed(5);
        assert_eq!(metrics.snapshot().clients_active, 0);
    }
}
