//! # rnp-protocol
//!
//! Binary UDP protocol for synchronizing game state between a server and its
//! clients: 16-byte big-endian framing, typed payloads, a session handshake,
//! cumulative + selective acknowledgement for packets sent RELIABLE, and a
//! compact TLV encoding for gameplay events.
//!
//! ## Layers
//! - [`core`]: wire format (header, packet, datagram codec, event records)
//! - [`protocol`]: typed messages, handshake, reliability, handler dispatch
//! - [`transport`]: per-engine UDP I/O thread and the server session table
//! - [`service`]: the client and server engines applications use
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging/metrics
//!
//! ## Quick start
//! ```no_run
//! use rnp_protocol::config::{ClientConfig, ServerConfig};
//! use rnp_protocol::service::{client::ClientEngine, server::ServerEngine};
//!
//! # fn main() -> rnp_protocol::Result<()> {
//! let server = ServerEngine::start(ServerConfig {
//!     address: "127.0.0.1:4567".into(),
//!     ..ServerConfig::default()
//! })?;
//!
//! let mut client = ClientEngine::new(ClientConfig::default());
//! client.connect("127.0.0.1", server.local_addr().port(), "Ace", 0)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{NetworkConfig, DEFAULT_PORT};
pub use crate::core::event::{EntityEvents, EventRecord, EventType};
pub use crate::core::packet::{Packet, PacketFlags, PacketHeader, PacketType, HEADER_SIZE, MAX_PAYLOAD};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::message::{DisconnectReason, ErrorCode, Message};
pub use crate::service::client::{ClientEngine, ClientEvent, ClientStatus};
pub use crate::service::server::{ServerEngine, ServerEvent};
