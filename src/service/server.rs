//! # Server Engine
//!
//! Accepts CONNECTs, hands out session ids and relays client traffic to the
//! application. Every client gets its own sequence counter and pending set;
//! broadcasts are stamped per client.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::{ServerConfig, TransportConfig};
use crate::core::event::{EntityEvents, EventRecord};
use crate::core::packet::{decode_header, payload_slice, Packet, PacketFlags, PacketHeader, PacketType};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, PacketContext};
use crate::protocol::message::{
    ConnectAccept, DisconnectReason, ErrorCode, Message, PingPayload, WorldState,
};
use crate::protocol::reliability::ReliabilityTracker;
use crate::protocol::stamp;
use crate::service::{check_payload, emit, send_flags};
use crate::transport::session_table::{SessionTable, SessionTableStats};
use crate::transport::udp::{self, Endpoint, Outbox, TransportHandle};
use crate::utils::metrics::global_metrics;
use crate::utils::time::{monotonic_ms, rtt_since};

/// Client activity reported to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected {
        endpoint: SocketAddr,
        session_id: u32,
        name: String,
        client_caps: u32,
    },
    ClientDisconnected {
        endpoint: SocketAddr,
        session_id: u32,
        reason: DisconnectReason,
    },
    WorldState {
        endpoint: SocketAddr,
        state: WorldState,
    },
    Events {
        endpoint: SocketAddr,
        session_id: u32,
        events: EntityEvents,
    },
    Error {
        endpoint: SocketAddr,
        code: ErrorCode,
        message: String,
    },
    Pong {
        endpoint: SocketAddr,
        nonce: u32,
        rtt: Duration,
    },
}

#[derive(Debug)]
enum ServerCommand {
    Broadcast {
        message: Message,
        flags: PacketFlags,
    },
    SendTo {
        endpoint: SocketAddr,
        message: Message,
        flags: PacketFlags,
    },
    DisconnectClient {
        endpoint: SocketAddr,
        reason: DisconnectReason,
    },
    Retransmit,
}

/// A running RNP server.
pub struct ServerEngine {
    transport: TransportHandle<ServerCommand>,
    dispatcher: Dispatcher,
    events_rx: mpsc::Receiver<ServerEvent>,
    stats_rx: watch::Receiver<SessionTableStats>,
    max_payload: usize,
    stopped: bool,
}

impl ServerEngine {
    /// Bind `config.address` and start serving with default transport settings.
    pub fn start(config: ServerConfig) -> Result<Self> {
        Self::start_with_transport(config, TransportConfig::default())
    }

    #[instrument(skip_all, fields(address = %config.address))]
    pub fn start_with_transport(config: ServerConfig, transport_config: TransportConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(errors.join("; ")));
        }

        let socket = udp::bind(config.socket_addr()?)?;
        let dispatcher = Dispatcher::new();
        let (events_tx, events_rx) = mpsc::channel(transport_config.event_queue_capacity.max(1));

        let table = SessionTable::new(config.max_clients);
        let (stats_tx, stats_rx) = watch::channel(table.stats());

        let protocol = ServerProtocol {
            table,
            accept: ConnectAccept {
                session_id: 0,
                tick_rate_hz: config.tick_rate_hz,
                mtu_payload_bytes: config.mtu_payload_bytes,
                server_caps: config.server_caps,
            },
            dispatcher: dispatcher.clone(),
            events: events_tx,
            stats: stats_tx,
            max_payload: transport_config.max_payload_size,
        };

        let transport = udp::spawn(socket, protocol, &transport_config, "rnp-server-io")?;
        info!(local = %transport.local_addr(), max_clients = config.max_clients, "Server listening");

        Ok(Self {
            transport,
            dispatcher,
            events_rx,
            stats_rx,
            max_payload: transport_config.max_payload_size,
            stopped: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn broadcast_world_state(&self, state: WorldState, reliable: bool) -> Result<()> {
        self.broadcast(Message::WorldState(state), reliable)
    }

    pub fn broadcast_events(&self, server_tick: u32, events: Vec<EventRecord>, reliable: bool) -> Result<()> {
        self.broadcast(Message::EntityEvent(EntityEvents::new(server_tick, events)), reliable)
    }

    /// Send `message` to every connected client.
    pub fn broadcast(&self, message: Message, reliable: bool) -> Result<()> {
        check_payload(&message, self.max_payload)?;
        self.transport.post(ServerCommand::Broadcast {
            message,
            flags: send_flags(reliable),
        })
    }

    /// Send `message` to one connected client. Messages for endpoints without
    /// a session are dropped on the I/O thread with a warning.
    pub fn send_to(&self, endpoint: SocketAddr, message: Message, reliable: bool) -> Result<()> {
        check_payload(&message, self.max_payload)?;
        self.transport.post(ServerCommand::SendTo {
            endpoint,
            message,
            flags: send_flags(reliable),
        })
    }

    /// PING one client; the answer arrives as [`ServerEvent::Pong`].
    pub fn ping_client(&self, endpoint: SocketAddr) -> Result<()> {
        let ping = PingPayload {
            nonce: rand::random(),
            send_time_ms: monotonic_ms(),
        };
        self.send_to(endpoint, Message::Ping(ping), false)
    }

    /// Send DISCONNECT to `endpoint` and forget its session.
    pub fn disconnect_client(&self, endpoint: SocketAddr, reason: DisconnectReason) -> Result<()> {
        self.transport
            .post(ServerCommand::DisconnectClient { endpoint, reason })
    }

    pub fn retransmit_pending(&self) -> Result<()> {
        self.transport.post(ServerCommand::Retransmit)
    }

    pub fn on<F>(&self, packet_type: PacketType, handler: F) -> Result<()>
    where
        F: Fn(&PacketContext<'_>) + Send + Sync + 'static,
    {
        self.dispatcher.register(packet_type, handler)
    }

    pub fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.try_recv().ok()
    }

    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.recv().await
    }

    /// Session table figures as of the last change the I/O thread saw.
    pub fn stats(&self) -> SessionTableStats {
        *self.stats_rx.borrow()
    }

    pub fn client_count(&self) -> usize {
        self.stats_rx.borrow().clients
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_running()
    }

    /// Tell every client SERVER_SHUTDOWN, close the socket and join the I/O
    /// thread. Idempotent; also runs on drop.
    #[instrument(skip(self), fields(local = %self.transport.local_addr()))]
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.transport.shutdown();
        global_metrics().log_metrics();
        info!("Server stopped");
    }
}

impl Drop for ServerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Server protocol state, owned by the I/O thread.
struct ServerProtocol {
    table: SessionTable,
    /// CONNECT_ACCEPT template; `session_id` is filled per client.
    accept: ConnectAccept,
    dispatcher: Dispatcher,
    events: mpsc::Sender<ServerEvent>,
    stats: watch::Sender<SessionTableStats>,
    max_payload: usize,
}

impl ServerProtocol {
    /// Send to a client with a session, using its sequence counter.
    fn send_to_client(
        &mut self,
        endpoint: SocketAddr,
        message: &Message,
        flags: PacketFlags,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let payload = message.encode_payload()?;
        if payload.len() > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        let record = self
            .table
            .get_mut(&endpoint)
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_UNAUTHORIZED.to_string()))?;
        let bytes = stamp(
            &mut record.reliability,
            message.packet_type(),
            &payload,
            flags,
            record.session_id,
        )?;
        outbox.push(bytes, endpoint);
        Ok(())
    }

    /// Reply to an endpoint without a session: sequence 0, session 0, never
    /// tracked.
    fn send_to_stranger(
        &self,
        endpoint: SocketAddr,
        message: &Message,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let packet = Packet::new(
            message.packet_type(),
            PacketFlags::empty(),
            0,
            0,
            message.encode_payload()?,
        )?;
        outbox.push(packet.to_bytes(), endpoint);
        Ok(())
    }

    /// Session-aware send used for replies: known clients get their own
    /// counter, strangers a one-off packet.
    fn reply(&mut self, endpoint: SocketAddr, message: &Message, flags: PacketFlags, outbox: &mut Outbox) {
        let result = if self.table.contains(&endpoint) {
            self.send_to_client(endpoint, message, flags, outbox)
        } else {
            self.send_to_stranger(endpoint, message, outbox)
        };
        if let Err(e) = result {
            warn!(%endpoint, packet = %message.packet_type(), error = %e, "Reply failed");
        }
    }

    fn publish_stats(&self) {
        let stats = self.table.stats();
        self.stats.send_if_modified(|current| {
            let changed = *current != stats;
            *current = stats;
            changed
        });
    }

    fn acknowledge(&mut self, from: SocketAddr, header: &PacketHeader, outbox: &mut Outbox) {
        if header.is_reliable() {
            if let Some(record) = self.table.get_mut(&from) {
                record.reliability.note_received(header.sequence);
            }
        }
        if let Some(ack) = ReliabilityTracker::ack_for(header) {
            self.reply(from, &Message::Ack(ack), PacketFlags::empty(), outbox);
            global_metrics().ack_sent();
        }
    }

    fn handle_connect(&mut self, from: SocketAddr, name: &str, client_caps: u32, outbox: &mut Outbox) {
        global_metrics().handshake_attempt();
        let is_new = !self.table.contains(&from);

        let session_id = match self.table.add_client(from, name) {
            Ok(id) => id,
            Err(e) => {
                warn!(%from, error = %e, "Refusing CONNECT");
                let refusal = Message::Disconnect {
                    reason: DisconnectReason::ServerFull,
                };
                self.reply(from, &refusal, PacketFlags::empty(), outbox);
                return;
            }
        };

        let accept = Message::ConnectAccept(ConnectAccept {
            session_id,
            ..self.accept
        });
        self.reply(from, &accept, send_flags(true), outbox);

        if is_new {
            global_metrics().handshake_success();
            global_metrics().client_added();
            info!(%from, session_id, name, client_caps, "Client connected");
            self.publish_stats();
            emit(
                &self.events,
                ServerEvent::ClientConnected {
                    endpoint: from,
                    session_id,
                    name: name.to_owned(),
                    client_caps,
                },
            );
        }
    }

    fn forget(&mut self, endpoint: SocketAddr, reason: DisconnectReason) {
        if let Some(record) = self.table.remove_client(&endpoint) {
            global_metrics().clients_removed(1);
            info!(%endpoint, session_id = record.session_id, ?reason, "Client disconnected");
            self.publish_stats();
            emit(
                &self.events,
                ServerEvent::ClientDisconnected {
                    endpoint,
                    session_id: record.session_id,
                    reason,
                },
            );
        }
    }

    /// Built-in handling. Returns false when the packet must not reach the
    /// registered handlers.
    fn handle_message(&mut self, from: SocketAddr, message: &Message, outbox: &mut Outbox) -> bool {
        let session_id = self.table.get(&from).map(|record| record.session_id);

        match message {
            Message::Connect { name, client_caps } => {
                self.handle_connect(from, name, *client_caps, outbox);
            }
            Message::Disconnect { reason } => self.forget(from, *reason),
            Message::WorldState(_) | Message::EntityEvent(_) if session_id.is_none() => {
                debug!(%from, "Session traffic from unknown endpoint");
                let error = Message::error(ErrorCode::UnauthorizedSession, constants::ERR_UNAUTHORIZED);
                self.reply(from, &error, PacketFlags::empty(), outbox);
                return false;
            }
            Message::WorldState(state) => emit(
                &self.events,
                ServerEvent::WorldState {
                    endpoint: from,
                    state: state.clone(),
                },
            ),
            Message::EntityEvent(events) => emit(
                &self.events,
                ServerEvent::Events {
                    endpoint: from,
                    session_id: session_id.unwrap_or_default(),
                    events: events.clone(),
                },
            ),
            Message::Ack(ack) => {
                if let Some(record) = self.table.get_mut(&from) {
                    let cleared = record.reliability.on_ack(ack.cumulative, ack.ack_bits);
                    global_metrics().ack_received(cleared as u64);
                }
                self.publish_stats();
            }
            Message::Ping(ping) => {
                self.reply(from, &Message::Pong(*ping), PacketFlags::empty(), outbox);
            }
            Message::Pong(pong) => emit(
                &self.events,
                ServerEvent::Pong {
                    endpoint: from,
                    nonce: pong.nonce,
                    rtt: rtt_since(pong.send_time_ms, monotonic_ms()),
                },
            ),
            Message::Error { code, message } => {
                warn!(%from, ?code, %message, "Client reported an error");
                emit(
                    &self.events,
                    ServerEvent::Error {
                        endpoint: from,
                        code: *code,
                        message: message.clone(),
                    },
                );
            }
            Message::ConnectAccept(_) => debug!(%from, "Ignoring CONNECT_ACCEPT sent to a server"),
        }
        true
    }
}

impl Endpoint for ServerProtocol {
    type Command = ServerCommand;

    fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, outbox: &mut Outbox) {
        let header = match decode_header(datagram) {
            Ok(header) => header,
            Err(e) => {
                global_metrics().decode_error();
                debug!(%from, error = %e, len = datagram.len(), "Undecodable datagram");
                return;
            }
        };
        let payload = payload_slice(&header, datagram);

        self.table.touch(&from);
        self.acknowledge(from, &header, outbox);

        let Some(kind) = header.kind() else {
            global_metrics().unknown_packet();
            debug!(%from, packet_type = header.packet_type, "Unknown packet type");
            return;
        };

        let message = match Message::decode(kind, payload) {
            Ok(message) => message,
            Err(e) => {
                global_metrics().decode_error();
                debug!(%from, packet = %kind, error = %e, "Malformed payload");
                let error = Message::error(ErrorCode::InvalidPayload, e.to_string());
                self.reply(from, &error, PacketFlags::empty(), outbox);
                return;
            }
        };

        if !self.handle_message(from, &message, outbox) {
            return;
        }

        let ctx = PacketContext {
            from,
            header: &header,
            message: &message,
        };
        if let Err(e) = self.dispatcher.dispatch(&ctx) {
            warn!(error = %e, "Handler dispatch failed");
        }
    }

    fn on_command(&mut self, command: ServerCommand, outbox: &mut Outbox) {
        match command {
            ServerCommand::Broadcast { message, flags } => {
                if let Err(e) = self.table.broadcast(&message, flags, outbox) {
                    warn!(packet = %message.packet_type(), error = %e, "Broadcast failed");
                }
                self.publish_stats();
            }
            ServerCommand::SendTo {
                endpoint,
                message,
                flags,
            } => {
                if let Err(e) = self.send_to_client(endpoint, &message, flags, outbox) {
                    warn!(%endpoint, packet = %message.packet_type(), error = %e, "Send failed");
                }
            }
            ServerCommand::DisconnectClient { endpoint, reason } => {
                if !self.table.contains(&endpoint) {
                    debug!(%endpoint, "Disconnect for unknown client");
                    return;
                }
                self.reply(endpoint, &Message::Disconnect { reason }, PacketFlags::empty(), outbox);
                self.forget(endpoint, reason);
            }
            ServerCommand::Retransmit => self.on_tick(outbox),
        }
    }

    fn on_tick(&mut self, outbox: &mut Outbox) {
        let queued = self.table.retransmit_all(outbox);
        if queued > 0 {
            global_metrics().retransmitted(queued as u64);
            debug!(count = queued, "Retransmitting");
        }
    }

    fn on_shutdown(&mut self, outbox: &mut Outbox) {
        let goodbye = Message::Disconnect {
            reason: DisconnectReason::ServerShutdown,
        };
        if let Err(e) = self.table.broadcast(&goodbye, PacketFlags::empty(), outbox) {
            warn!(error = %e, "Shutdown broadcast failed");
        }
        global_metrics().clients_removed(self.table.len() as u64);
        self.table.clear();
        self.publish_stats();
    }
}
