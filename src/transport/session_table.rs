//! # Session Table
//!
//! Server-side registry of connected clients, keyed by remote endpoint.
//!
//! Records are created on CONNECT and removed on DISCONNECT. The table is
//! owned by the server's I/O loop, so it needs no locking; the last-seen
//! instant is kept for diagnostics only and never drives eviction.
//!
//! Each record carries its own [`ReliabilityTracker`], so the server's outbound
//! sequence numbers and pending reliable sends are per client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, trace};

use crate::core::packet::PacketFlags;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{truncate_name, Message};
use crate::protocol::reliability::ReliabilityTracker;
use crate::protocol::stamp;
use crate::transport::udp::Outbox;

/// One connected client as the server sees it.
#[derive(Debug)]
pub struct ClientRecord {
    pub endpoint: SocketAddr,
    pub name: String,
    pub session_id: u32,
    pub connected: bool,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub reliability: ReliabilityTracker,
}

impl ClientRecord {
    fn new(endpoint: SocketAddr, name: &str, session_id: u32) -> Self {
        let now = Instant::now();
        Self {
            endpoint,
            name: truncate_name(name).to_owned(),
            session_id,
            connected: true,
            connected_at: now,
            last_seen: now,
            reliability: ReliabilityTracker::new(),
        }
    }
}

/// Endpoint -> client record.
#[derive(Debug)]
pub struct SessionTable {
    clients: HashMap<SocketAddr, ClientRecord>,
    next_session_id: u32,
    max_clients: usize,
    total_connects: u64,
}

impl SessionTable {
    /// Create an empty table admitting at most `max_clients` records.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::with_capacity(max_clients.min(1024)),
            next_session_id: 1,
            max_clients,
            total_connects: 0,
        }
    }

    /// Register a client after CONNECT and return its session id.
    ///
    /// An endpoint that already has a record keeps its session id; only the
    /// name and connected flag are refreshed. New endpoints get the next id
    /// from a counter that starts at 1 and skips 0 on wrap.
    ///
    /// # Errors
    /// `ServerFull` when a new endpoint arrives and the table is at capacity.
    pub fn add_client(&mut self, endpoint: SocketAddr, name: &str) -> Result<u32> {
        if let Some(record) = self.clients.get_mut(&endpoint) {
            record.name = truncate_name(name).to_owned();
            record.connected = true;
            record.last_seen = Instant::now();
            debug!(%endpoint, session_id = record.session_id, "Repeat CONNECT, keeping session");
            return Ok(record.session_id);
        }

        if self.is_full() {
            return Err(ProtocolError::ServerFull(self.max_clients));
        }

        let session_id = self.allocate_id();
        self.clients
            .insert(endpoint, ClientRecord::new(endpoint, name, session_id));
        self.total_connects += 1;

        debug!(
            %endpoint,
            session_id,
            clients = self.clients.len(),
            "Client added to session table"
        );
        Ok(session_id)
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_session_id;
        self.next_session_id = match self.next_session_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }

    pub fn remove_client(&mut self, endpoint: &SocketAddr) -> Option<ClientRecord> {
        let removed = self.clients.remove(endpoint);
        if let Some(record) = &removed {
            debug!(
                %endpoint,
                session_id = record.session_id,
                clients = self.clients.len(),
                "Client removed from session table"
            );
        }
        removed
    }

    /// Update last-seen for a known endpoint. Returns false for strangers.
    pub fn touch(&mut self, endpoint: &SocketAddr) -> bool {
        match self.clients.get_mut(endpoint) {
            Some(record) => {
                record.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, endpoint: &SocketAddr) -> Option<&ClientRecord> {
        self.clients.get(endpoint)
    }

    pub fn get_mut(&mut self, endpoint: &SocketAddr) -> Option<&mut ClientRecord> {
        self.clients.get_mut(endpoint)
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.clients.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.clients.keys().copied().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    /// Queue `message` for every connected client.
    ///
    /// The payload is encoded once; each copy gets that client's session id
    /// and next sequence number. RELIABLE copies are recorded as pending in
    /// the client's tracker. Returns the number of clients queued.
    pub fn broadcast(
        &mut self,
        message: &Message,
        flags: PacketFlags,
        outbox: &mut Outbox,
    ) -> Result<usize> {
        let payload = message.encode_payload()?;
        let packet_type = message.packet_type();

        let mut sent = 0;
        for record in self.clients.values_mut().filter(|r| r.connected) {
            let bytes = stamp(
                &mut record.reliability,
                packet_type,
                &payload,
                flags,
                record.session_id,
            )?;
            outbox.push(bytes, record.endpoint);
            sent += 1;
        }

        trace!(packet = %packet_type, clients = sent, "Broadcast queued");
        Ok(sent)
    }

    /// Pending reliable packets for every client, paired with their endpoint.
    pub fn retransmit_all(&self, outbox: &mut Outbox) -> usize {
        let mut queued = 0;
        for record in self.clients.values() {
            for bytes in record.reliability.retransmit_all() {
                outbox.push(bytes, record.endpoint);
                queued += 1;
            }
        }
        queued
    }

    pub fn clear(&mut self) {
        let count = self.clients.len();
        self.clients.clear();
        debug!(cleared_count = count, "Session table cleared");
    }

    pub fn stats(&self) -> SessionTableStats {
        SessionTableStats {
            clients: self.clients.len(),
            max_clients: self.max_clients,
            pending_reliable: self
                .clients
                .values()
                .map(|r| r.reliability.pending_len())
                .sum(),
            total_connects: self.total_connects,
        }
    }
}

/// Point-in-time view of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTableStats {
    pub clients: usize,
    pub max_clients: usize,
    /// Reliable packets awaiting an ACK, summed across clients
    pub pending_reliable: usize,
    /// Records ever created
    pub total_connects: u64,
}
