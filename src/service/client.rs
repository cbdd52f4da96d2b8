//! # Client Engine
//!
//! Connects to one RNP server, runs the handshake and delivers decoded
//! traffic to the application.
//!
//! ```no_run
//! use rnp_protocol::config::ClientConfig;
//! use rnp_protocol::service::client::{ClientEngine, ClientEvent};
//!
//! # async fn run() -> rnp_protocol::error::Result<()> {
//! let mut client = ClientEngine::new(ClientConfig::default());
//! client.connect("127.0.0.1", 4567, "Ace", 0)?;
//!
//! while let Some(event) = client.next_event().await {
//!     if let ClientEvent::Connected(session) = event {
//!         println!("joined as session {}", session.session_id);
//!         client.send_ping()?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Inbound datagrams go through the same steps every time: source check,
//! header decode, session check, reliability bookkeeping, built-in handling
//! by type, then registered handlers.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, TransportConfig};
use crate::core::event::{EntityEvents, EventRecord, EventType};
use crate::core::packet::{decode_header, payload_slice, PacketFlags, PacketHeader, PacketType};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, PacketContext};
use crate::protocol::handshake::{ClientHandshake, Session, SessionState};
use crate::protocol::message::{
    AckPayload, DisconnectReason, ErrorCode, Message, PingPayload, WorldState,
};
use crate::protocol::reliability::ReliabilityTracker;
use crate::protocol::stamp;
use crate::service::{check_payload, emit, send_flags};
use crate::transport::udp::{self, Endpoint, Outbox, TransportHandle};
use crate::utils::metrics::global_metrics;
use crate::utils::time::{monotonic_ms, rtt_since};

/// Something the server told us.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// CONNECT_ACCEPT received; the session is live.
    Connected(Session),
    /// The server ended the session.
    Disconnected { reason: DisconnectReason },
    WorldState(WorldState),
    Events(EntityEvents),
    /// ERROR packet from the server.
    Error { code: ErrorCode, message: String },
    /// PONG for one of our PINGs.
    Pong { nonce: u32, rtt: Duration },
}

/// Latest connection state, readable from any thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientStatus {
    pub state: SessionState,
    pub session: Option<Session>,
    pub last_rtt: Option<Duration>,
    pub server: Option<SocketAddr>,
    /// Latest tick seen in WORLD_STATE or a headed ENTITY_EVENT batch.
    pub last_server_tick: Option<u32>,
}

#[derive(Debug)]
enum ClientCommand {
    Connect { name: String, client_caps: u32 },
    Disconnect(DisconnectReason),
    Send { message: Message, flags: PacketFlags },
    Ping,
    Ack(AckPayload),
    Retransmit,
}

/// Application handle for a client connection.
pub struct ClientEngine {
    config: ClientConfig,
    transport_config: TransportConfig,
    dispatcher: Dispatcher,
    transport: Option<TransportHandle<ClientCommand>>,
    status_tx: Arc<watch::Sender<ClientStatus>>,
    status_rx: watch::Receiver<ClientStatus>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: mpsc::Receiver<ClientEvent>,
}

impl ClientEngine {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, TransportConfig::default())
    }

    pub fn with_transport(config: ClientConfig, transport_config: TransportConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let (events_tx, events_rx) = mpsc::channel(transport_config.event_queue_capacity.max(1));
        Self {
            config,
            transport_config,
            dispatcher: Dispatcher::new(),
            transport: None,
            status_tx: Arc::new(status_tx),
            status_rx,
            events_tx,
            events_rx,
        }
    }

    /// Resolve `host:port`, start the I/O thread and send CONNECT.
    ///
    /// Returns once CONNECT is queued; [`ClientEvent::Connected`] follows
    /// when the server accepts. A previous, already disconnected transport is
    /// torn down first.
    ///
    /// # Errors
    /// `AlreadyConnected` while a session is live, `Io` for resolution or
    /// bind failures.
    #[instrument(skip(self))]
    pub fn connect(&mut self, host: &str, port: u16, player_name: &str, client_caps: u32) -> Result<()> {
        if self.state() != SessionState::Disconnected && self.is_running() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.stop_transport();

        let server = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ProtocolError::ConfigError(format!("No address for {host}:{port}")))?;

        let bind_addr: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = udp::bind(bind_addr)?;

        let protocol = ClientProtocol {
            server,
            handshake: ClientHandshake::new(),
            dispatcher: self.dispatcher.clone(),
            events: self.events_tx.clone(),
            status: Arc::clone(&self.status_tx),
            max_payload: self.transport_config.max_payload_size,
        };
        self.status_tx.send_modify(|status| {
            *status = ClientStatus {
                server: Some(server),
                ..ClientStatus::default()
            };
        });

        let transport = udp::spawn(socket, protocol, &self.transport_config, "rnp-client-io")?;
        transport.post(ClientCommand::Connect {
            name: player_name.to_owned(),
            client_caps,
        })?;
        info!(%server, local = %transport.local_addr(), "Connecting");
        self.transport = Some(transport);
        Ok(())
    }

    /// [`connect`](Self::connect) using the configured address, name and caps.
    pub fn connect_configured(&mut self) -> Result<()> {
        let (host, port) = self.config.host_port()?;
        let name = self.config.player_name.clone();
        let caps = self.config.client_caps;
        self.connect(&host, port, &name, caps)
    }

    /// Send DISCONNECT, then stop the I/O thread.
    #[instrument(skip(self))]
    pub fn disconnect(&mut self, reason: DisconnectReason) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(ProtocolError::NotConnected)?;
        transport.post(ClientCommand::Disconnect(reason))?;
        self.stop_transport();
        info!(?reason, "Disconnected");
        Ok(())
    }

    pub fn send_ping(&self) -> Result<()> {
        self.post(ClientCommand::Ping)
    }

    /// One INPUT record for `entity_id`, sent unreliably in a batch stamped
    /// with the latest server tick seen (0 before any).
    pub fn send_player_input(&self, entity_id: u32, data: &[u8]) -> Result<()> {
        let tick = self.status_rx.borrow().last_server_tick.unwrap_or(0);
        let record = EventRecord::new(EventType::Input, entity_id, data);
        self.send(Message::EntityEvent(EntityEvents::new(tick, vec![record])), false)
    }

    pub fn send_events(&self, server_tick: u32, events: Vec<EventRecord>, reliable: bool) -> Result<()> {
        self.send(Message::EntityEvent(EntityEvents::new(server_tick, events)), reliable)
    }

    pub fn send_ack(&self, cumulative: u32, ack_bits: u32) -> Result<()> {
        self.post(ClientCommand::Ack(AckPayload {
            cumulative,
            ack_bits,
        }))
    }

    /// Resend every unacknowledged reliable packet now.
    pub fn retransmit_pending(&self) -> Result<()> {
        self.post(ClientCommand::Retransmit)
    }

    /// Send any message to the server.
    pub fn send(&self, message: Message, reliable: bool) -> Result<()> {
        check_payload(&message, self.transport_config.max_payload_size)?;
        self.post(ClientCommand::Send {
            message,
            flags: send_flags(reliable),
        })
    }

    /// Register a handler that runs on the I/O thread after the built-in
    /// handling for `packet_type`.
    pub fn on<F>(&self, packet_type: PacketType, handler: F) -> Result<()>
    where
        F: Fn(&PacketContext<'_>) + Send + Sync + 'static,
    {
        self.dispatcher.register(packet_type, handler)
    }

    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Wait for the next event. Resolves to `None` only once the engine is
    /// dropped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.recv().await
    }

    pub fn status(&self) -> ClientStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status_rx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.status_rx.borrow().state
    }

    pub fn session(&self) -> Option<Session> {
        self.status_rx.borrow().session
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.status_rx.borrow().last_rtt
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(TransportHandle::local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.transport.as_ref().is_some_and(TransportHandle::is_running)
    }

    fn post(&self, command: ClientCommand) -> Result<()> {
        self.transport
            .as_ref()
            .ok_or(ProtocolError::NotConnected)?
            .post(command)
    }

    fn stop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.status_tx.send_modify(|status| {
            status.state = SessionState::Disconnected;
            status.session = None;
        });
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.stop_transport();
    }
}

/// Client protocol state, owned by the I/O thread.
struct ClientProtocol {
    server: SocketAddr,
    handshake: ClientHandshake,
    dispatcher: Dispatcher,
    events: mpsc::Sender<ClientEvent>,
    status: Arc<watch::Sender<ClientStatus>>,
    max_payload: usize,
}

impl ClientProtocol {
    fn send(&mut self, message: &Message, flags: PacketFlags, outbox: &mut Outbox) -> Result<()> {
        let payload = message.encode_payload()?;
        if payload.len() > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        let session_id = self.handshake.outbound_session_id();
        let bytes = stamp(
            self.handshake.reliability_mut(),
            message.packet_type(),
            &payload,
            flags,
            session_id,
        )?;
        outbox.push(bytes, self.server);
        Ok(())
    }

    fn send_or_warn(&mut self, message: &Message, flags: PacketFlags, outbox: &mut Outbox) {
        if let Err(e) = self.send(message, flags, outbox) {
            warn!(packet = %message.packet_type(), error = %e, "Send failed");
        }
    }

    fn publish_status(&self) {
        let state = self.handshake.state();
        let session = self.handshake.session().copied();
        self.status.send_modify(|status| {
            status.state = state;
            status.session = session;
        });
    }

    fn note_server_tick(&self, tick: u32) {
        self.status.send_if_modified(|status| {
            let changed = status.last_server_tick != Some(tick);
            status.last_server_tick = Some(tick);
            changed
        });
    }

    fn acknowledge(&mut self, header: &PacketHeader, outbox: &mut Outbox) {
        if header.is_reliable() {
            self.handshake.reliability_mut().note_received(header.sequence);
        }
        if let Some(ack) = ReliabilityTracker::ack_for(header) {
            self.send_or_warn(&Message::Ack(ack), PacketFlags::empty(), outbox);
            self.handshake.note_ack_sent(ack.cumulative);
            global_metrics().ack_sent();
        }
    }

    fn handle_message(&mut self, payload: &[u8], message: &Message, outbox: &mut Outbox) {
        match message {
            Message::ConnectAccept(_) => {
                let was_connecting = self.handshake.state() == SessionState::Connecting;
                match self.handshake.accept(payload) {
                    Ok(session) if was_connecting => {
                        global_metrics().handshake_success();
                        self.publish_status();
                        emit(&self.events, ClientEvent::Connected(session));
                    }
                    Ok(_) => debug!("Duplicate CONNECT_ACCEPT"),
                    Err(e) => debug!(error = %e, "CONNECT_ACCEPT ignored"),
                }
            }
            Message::Disconnect { reason } => {
                info!(?reason, "Server ended the session");
                self.handshake.disconnect();
                self.publish_status();
                emit(&self.events, ClientEvent::Disconnected { reason: *reason });
            }
            Message::WorldState(world) => {
                self.note_server_tick(world.server_tick);
                emit(&self.events, ClientEvent::WorldState(world.clone()));
            }
            Message::EntityEvent(batch) => {
                if let Some(tick) = batch.server_tick {
                    self.note_server_tick(tick);
                }
                emit(&self.events, ClientEvent::Events(batch.clone()));
            }
            Message::Ack(ack) => {
                let cleared = self
                    .handshake
                    .reliability_mut()
                    .on_ack(ack.cumulative, ack.ack_bits);
                global_metrics().ack_received(cleared as u64);
            }
            Message::Error { code, message } => {
                warn!(?code, %message, "Server reported an error");
                emit(
                    &self.events,
                    ClientEvent::Error {
                        code: *code,
                        message: message.clone(),
                    },
                );
            }
            Message::Ping(ping) => {
                self.send_or_warn(&Message::Pong(*ping), PacketFlags::empty(), outbox);
            }
            Message::Pong(pong) => {
                let rtt = rtt_since(pong.send_time_ms, monotonic_ms());
                self.status.send_modify(|status| status.last_rtt = Some(rtt));
                debug!(nonce = pong.nonce, rtt_ms = rtt.as_millis() as u64, "PONG");
                emit(
                    &self.events,
                    ClientEvent::Pong {
                        nonce: pong.nonce,
                        rtt,
                    },
                );
            }
            Message::Connect { .. } => debug!("Ignoring CONNECT sent to a client"),
        }
    }
}

impl Endpoint for ClientProtocol {
    type Command = ClientCommand;

    fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, outbox: &mut Outbox) {
        if from != self.server {
            global_metrics().session_drop();
            debug!(%from, "Dropping datagram from unknown source");
            return;
        }

        let header = match decode_header(datagram) {
            Ok(header) => header,
            Err(e) => {
                global_metrics().decode_error();
                debug!(error = %e, len = datagram.len(), "Undecodable datagram");
                return;
            }
        };
        let payload = payload_slice(&header, datagram);

        if !self.handshake.admits(&header) {
            global_metrics().session_drop();
            debug!(
                expected = self.handshake.outbound_session_id(),
                actual = header.session_id,
                "Dropping packet for another session"
            );
            return;
        }

        self.acknowledge(&header, outbox);

        let Some(kind) = header.kind() else {
            global_metrics().unknown_packet();
            debug!(packet_type = header.packet_type, "Unknown packet type");
            return;
        };

        let message = match Message::decode(kind, payload) {
            Ok(message) => message,
            Err(e) => {
                global_metrics().decode_error();
                debug!(packet = %kind, error = %e, "Malformed payload");
                return;
            }
        };

        self.handle_message(payload, &message, outbox);

        let ctx = PacketContext {
            from,
            header: &header,
            message: &message,
        };
        if let Err(e) = self.dispatcher.dispatch(&ctx) {
            warn!(error = %e, "Handler dispatch failed");
        }
    }

    fn on_command(&mut self, command: ClientCommand, outbox: &mut Outbox) {
        match command {
            ClientCommand::Connect { name, client_caps } => {
                match self.handshake.begin_connect(&name, client_caps) {
                    Ok(connect) => {
                        global_metrics().handshake_attempt();
                        self.send_or_warn(&connect, send_flags(true), outbox);
                        self.publish_status();
                    }
                    Err(e) => warn!(error = %e, "Cannot start handshake"),
                }
            }
            ClientCommand::Disconnect(reason) => {
                if self.handshake.state() != SessionState::Disconnected {
                    self.send_or_warn(&Message::Disconnect { reason }, PacketFlags::empty(), outbox);
                }
                self.handshake.disconnect();
                self.publish_status();
            }
            ClientCommand::Send { message, flags } => self.send_or_warn(&message, flags, outbox),
            ClientCommand::Ping => {
                let ping = PingPayload {
                    nonce: rand::random(),
                    send_time_ms: monotonic_ms(),
                };
                self.send_or_warn(&Message::Ping(ping), PacketFlags::empty(), outbox);
            }
            ClientCommand::Ack(ack) => {
                self.send_or_warn(&Message::Ack(ack), PacketFlags::empty(), outbox);
                self.handshake.note_ack_sent(ack.cumulative);
                global_metrics().ack_sent();
            }
            ClientCommand::Retransmit => self.on_tick(outbox),
        }
    }

    fn on_tick(&mut self, outbox: &mut Outbox) {
        let resend = self.handshake.reliability().retransmit_all();
        if resend.is_empty() {
            return;
        }
        global_metrics().retransmitted(resend.len() as u64);
        debug!(count = resend.len(), "Retransmitting");
        for bytes in resend {
            outbox.push(bytes, self.server);
        }
    }
}
