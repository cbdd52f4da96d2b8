use crate::core::packet::{PacketHeader, PacketType};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&PacketContext<'_>) + Send + Sync + 'static;

/// What a handler sees for one decoded packet.
#[derive(Debug)]
pub struct PacketContext<'a> {
    pub from: SocketAddr,
    pub header: &'a PacketHeader,
    pub message: &'a Message,
}

/// Application handlers keyed by packet type.
///
/// Handlers run on the I/O thread after the engine's built-in behaviour for
/// the packet, so they must not block. Registration is allowed from any thread
/// except from inside a handler, which holds the read lock while it runs.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<PacketType, Vec<Box<HandlerFn>>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, packet_type: PacketType, handler: F) -> Result<()>
    where
        F: Fn(&PacketContext<'_>) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        handlers
            .entry(packet_type)
            .or_default()
            .push(Box::new(handler));
        Ok(())
    }

    /// Run every handler registered for the message's type. Returns how many
    /// ran.
    pub fn dispatch(&self, ctx: &PacketContext<'_>) -> Result<usize> {
        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;

        let Some(list) = handlers.get(&ctx.message.packet_type()) else {
            return Ok(0);
        };
        for handler in list {
            handler(ctx);
        }
        Ok(list.len())
    }

    pub fn has_handlers(&self, packet_type: PacketType) -> bool {
        self.handlers
            .read()
            .map(|h| h.get(&packet_type).is_some_and(|l| !l.is_empty()))
            .unwrap_or(false)
    }
}
