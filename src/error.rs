//! # Error Types
//!
//! Error handling for the RNP protocol core.
//!
//! This module defines every error variant that can occur while encoding,
//! decoding or transporting RNP packets, from truncated datagrams up to
//! transport-level socket failures.
//!
//! ## Error Categories
//! - **Framing Errors**: truncated headers, payloads and event records
//! - **Payload Errors**: oversized event lists, malformed packet bodies
//! - **Session Errors**: handshake replies and session id mismatches
//! - **Transport Errors**: socket failures and closed engines
//!
//! Decode-time errors never leave the receive loop: the engine logs them and
//! discards the datagram. They surface to callers only through the pure codec
//! functions.
//!
//! ## Example Usage
//! ```rust
//! use rnp_protocol::core::packet::decode_header;
//! use rnp_protocol::error::ProtocolError;
//!
//! match decode_header(&[0u8; 10]) {
//!     Err(ProtocolError::TruncatedHeader { actual }) => assert_eq!(actual, 10),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Engine lifecycle errors
    pub const ERR_IO_THREAD_SPAWN: &str = "Failed to spawn I/O thread";
    pub const ERR_RUNTIME_BUILD: &str = "Failed to build I/O runtime";

    /// Payload validation errors
    pub const ERR_CONNECT_TOO_SHORT: &str = "CONNECT payload shorter than declared name";
    pub const ERR_PING_TOO_SHORT: &str = "PING/PONG payload shorter than 8 bytes";
    pub const ERR_ACK_TOO_SHORT: &str = "ACK payload shorter than 8 bytes";
    pub const ERR_DISCONNECT_TOO_SHORT: &str = "DISCONNECT payload shorter than 2 bytes";
    pub const ERR_ERROR_TOO_SHORT: &str = "ERROR payload shorter than declared message";
    pub const ERR_WORLD_STATE_TOO_SHORT: &str = "WORLD_STATE payload shorter than declared entities";
    pub const ERR_UNKNOWN_EVENT_TYPE: &str = "Unknown event type";
    pub const ERR_UNKNOWN_ERROR_CODE: &str = "Unknown error code";

    /// Session errors
    pub const ERR_UNAUTHORIZED: &str = "No session for this endpoint";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Truncated header: {actual} bytes (need 16)")]
    TruncatedHeader { actual: usize },

    #[error("Truncated payload: header declares {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("Truncated event record at offset {offset}: need {needed} bytes, {remaining} remaining")]
    TruncatedEvent {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Event data too large: {0} bytes (max 255)")]
    EventDataTooLarge(usize),

    #[error("Invalid CONNECT_ACCEPT: {0} bytes (need 12)")]
    InvalidConnectAccept(usize),

    #[error("Invalid {packet} payload: {reason}")]
    InvalidPayload {
        packet: &'static str,
        reason: &'static str,
    },

    #[error("Unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("Session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: u32, actual: u32 },

    #[error("Socket error: {0}")]
    SocketError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Server full: {0} clients")]
    ServerFull(usize),

    #[error("Connection closed: I/O thread is no longer running")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the error comes from decoding untrusted bytes
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::TruncatedHeader { .. }
                | ProtocolError::TruncatedPayload { .. }
                | ProtocolError::TruncatedEvent { .. }
                | ProtocolError::InvalidConnectAccept(_)
                | ProtocolError::InvalidPayload { .. }
                | ProtocolError::UnknownPacketType(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
