//! # Protocol Engines
//!
//! [`client::ClientEngine`] and [`server::ServerEngine`] wrap the protocol
//! state in an [`Endpoint`](crate::transport::Endpoint) and run it on a
//! dedicated I/O thread. The application talks to them through plain method
//! calls that post commands, a bounded event channel, and registered handlers.

pub mod client;
pub mod server;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::core::packet::PacketFlags;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use crate::utils::metrics::global_metrics;

/// Reliable sends ask for an ACK; otherwise no flags.
pub(crate) fn send_flags(reliable: bool) -> PacketFlags {
    if reliable {
        PacketFlags::RELIABLE | PacketFlags::ACK_REQ
    } else {
        PacketFlags::empty()
    }
}

/// Encode `message` once to reject oversized sends on the caller's thread.
pub(crate) fn check_payload(message: &Message, max_payload: usize) -> Result<()> {
    let len = message.encode_payload()?.len();
    if len > max_payload {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    Ok(())
}

/// Hand an event to the application without blocking the I/O thread.
pub(crate) fn emit<T>(events: &mpsc::Sender<T>, event: T) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            global_metrics().event_dropped();
            warn!("Event queue full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!("Event receiver gone");
        }
    }
}
