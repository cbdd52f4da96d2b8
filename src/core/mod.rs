//! # Core Protocol Components
//!
//! Low-level packet handling, codecs, and binary event encoding.
//!
//! This module is the pure, stateless layer of the protocol: it turns headers,
//! payloads and event records into bytes and back, and nothing else.
//!
//! ## Components
//! - **Packet**: the fixed 16-byte header and whole-packet framing
//! - **Codec**: tokio-util codec for datagram framing
//! - **Event**: TLV game-event records carried by ENTITY_EVENT
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Length(2)] [Flags(2)] [Reserved(2)] [Sequence(4)] [SessionId(4)] [Pad(1)] [Payload(N)]
//! ```
//!
//! ## Safety on hostile input
//! - Every length is checked against the buffer before slicing
//! - Maximum payload size: 512 bytes
//! - Unknown packet types are passed through, never rejected here

pub mod codec;
pub mod event;
pub mod packet;
