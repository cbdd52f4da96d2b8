//! Client-side session handshake: CONNECT → CONNECT_ACCEPT.
//!
//! Handshake state lives in a [`ClientHandshake`] value owned by the engine
//! rather than in module-level statics, so each connection attempt starts from
//! clean state and the session id and sequence counter travel together.
//!
//! ```text
//! Disconnected --begin_connect--> Connecting --accept--> Connected
//!      ^                               |                     |
//!      +----------- disconnect --------+---------------------+
//! ```
//!
//! Once connected, every outbound packet carries the negotiated session id and
//! every inbound packet except CONNECT_ACCEPT must carry it too. This guards
//! against packets from a previous session bleeding through, not against
//! spoofing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::packet::{PacketHeader, PacketType};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{truncate_name, ConnectAccept, Message};
use crate::protocol::reliability::ReliabilityTracker;

/// Where the client is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Parameters negotiated by a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: u32,
    pub tick_rate_hz: u16,
    pub mtu_payload_bytes: u16,
    pub server_caps: u32,
    pub client_caps: u32,
    /// Cumulative value of the last ACK this client sent.
    pub last_ack_sent: Option<u32>,
}

/// Per-connection client state: lifecycle, session and outbound sequencing.
#[derive(Debug, Default)]
pub struct ClientHandshake {
    state: SessionState,
    player_name: String,
    client_caps: u32,
    session: Option<Session>,
    reliability: ReliabilityTracker,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn reliability(&self) -> &ReliabilityTracker {
        &self.reliability
    }

    pub fn reliability_mut(&mut self) -> &mut ReliabilityTracker {
        &mut self.reliability
    }

    /// Start a new connection attempt and produce the CONNECT message.
    ///
    /// Any previous session and pending sends are discarded. The name is cut
    /// to 31 bytes.
    ///
    /// # Errors
    /// `AlreadyConnected` when a session is established.
    #[instrument(skip(self), fields(state = ?self.state))]
    pub fn begin_connect(&mut self, player_name: &str, client_caps: u32) -> Result<Message> {
        if self.state == SessionState::Connected {
            return Err(ProtocolError::AlreadyConnected);
        }

        self.player_name = truncate_name(player_name).to_owned();
        self.client_caps = client_caps;
        self.session = None;
        self.reliability = ReliabilityTracker::new();
        self.state = SessionState::Connecting;

        debug!(name = %self.player_name, client_caps, "Client initiating handshake");

        Ok(Message::Connect {
            name: self.player_name.clone(),
            client_caps,
        })
    }

    /// Apply a CONNECT_ACCEPT payload.
    ///
    /// A repeat accept carrying the current session id is a no-op; one with a
    /// different id while connected is ignored with a warning.
    ///
    /// # Errors
    /// `InvalidConnectAccept` for payloads under 12 bytes, `NotConnected` when
    /// no connection attempt is in progress.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn accept(&mut self, payload: &[u8]) -> Result<Session> {
        let accept = ConnectAccept::decode(payload)?;

        match (self.state, self.session) {
            (SessionState::Connected, Some(session)) => {
                if session.session_id != accept.session_id {
                    warn!(
                        current = session.session_id,
                        offered = accept.session_id,
                        "Ignoring CONNECT_ACCEPT for a different session"
                    );
                }
                Ok(session)
            }
            (SessionState::Connecting, _) => {
                let session = Session {
                    session_id: accept.session_id,
                    tick_rate_hz: accept.tick_rate_hz,
                    mtu_payload_bytes: accept.mtu_payload_bytes,
                    server_caps: accept.server_caps,
                    client_caps: self.client_caps,
                    last_ack_sent: None,
                };
                self.session = Some(session);
                self.state = SessionState::Connected;
                info!(
                    session_id = session.session_id,
                    tick_rate_hz = session.tick_rate_hz,
                    mtu = session.mtu_payload_bytes,
                    "Session established"
                );
                Ok(session)
            }
            _ => Err(ProtocolError::NotConnected),
        }
    }

    /// Whether an inbound packet belongs to this session.
    ///
    /// Until the handshake completes everything is admitted. Afterwards a
    /// packet other than CONNECT_ACCEPT must carry the stored session id.
    pub fn admits(&self, header: &PacketHeader) -> bool {
        match (&self.session, header.kind()) {
            (_, Some(PacketType::ConnectAccept)) => true,
            (Some(session), _) => session.session_id == header.session_id,
            (None, _) => true,
        }
    }

    /// Same check as [`admits`](Self::admits), as a `Result`.
    pub fn check_session(&self, header: &PacketHeader) -> Result<()> {
        if self.admits(header) {
            return Ok(());
        }
        Err(ProtocolError::SessionMismatch {
            expected: self.outbound_session_id(),
            actual: header.session_id,
        })
    }

    /// Session id to stamp on outbound packets; 0 before the handshake.
    pub fn outbound_session_id(&self) -> u32 {
        self.session.map_or(0, |s| s.session_id)
    }

    /// Remember the cumulative value of an ACK we just sent.
    pub fn note_ack_sent(&mut self, cumulative: u32) {
        if let Some(session) = self.session.as_mut() {
            session.last_ack_sent = Some(cumulative);
        }
    }

    /// Drop the session and return to `Disconnected`.
    pub fn disconnect(&mut self) -> Option<Session> {
        self.state = SessionState::Disconnected;
        self.reliability.clear();
        self.session.take()
    }
}
