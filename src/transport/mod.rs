//! # Transport Layer
//!
//! UDP I/O and server-side session bookkeeping.
//!
//! - [`udp`]: the per-engine I/O thread, its select loop and the
//!   [`Endpoint`](udp::Endpoint) seam the client and server plug into
//! - [`session_table`]: connected clients keyed by endpoint

pub mod session_table;
pub mod udp;

pub use session_table::{ClientRecord, SessionTable, SessionTableStats};
pub use udp::{Endpoint, Outbox, TransportHandle};
