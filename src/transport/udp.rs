//! # UDP Transport
//!
//! One dedicated std thread per engine drives a current-thread tokio runtime.
//! The runtime owns the socket and runs a single loop that `select!`s over:
//!
//! - queued commands from the application (the thread-safe post primitive)
//! - the cancellation token
//! - `recv_from` on the socket
//! - an optional retransmit interval
//!
//! Whatever the [`Endpoint`] queued in the [`Outbox`] during an iteration is
//! flushed with `send_to` before the next one starts. The socket is never
//! touched outside this thread.
//!
//! Shutdown is posted, then cancelled, then joined; see
//! [`TransportHandle::shutdown`].

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Datagrams queued for sending at the end of the current loop iteration.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<(Bytes, SocketAddr)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, datagram: impl Into<Bytes>, to: SocketAddr) {
        self.queue.push((datagram.into(), to));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (Bytes, SocketAddr)> + '_ {
        self.queue.drain(..)
    }
}

/// Protocol state driven by the I/O loop.
///
/// All methods run on the I/O thread and must not block. Errors are handled
/// inside the endpoint; nothing propagates out of the loop.
pub trait Endpoint: Send + 'static {
    type Command: Send + 'static;

    /// A datagram arrived from `from`.
    fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, outbox: &mut Outbox);

    /// The application posted a command.
    fn on_command(&mut self, command: Self::Command, outbox: &mut Outbox);

    /// The retransmit interval elapsed.
    fn on_tick(&mut self, outbox: &mut Outbox);

    /// Last chance to queue datagrams before the socket closes.
    fn on_shutdown(&mut self, _outbox: &mut Outbox) {}
}

enum Control<C> {
    Command(C),
    Shutdown,
}

/// Application-side handle to a running I/O thread.
#[derive(Debug)]
pub struct TransportHandle<C> {
    commands: mpsc::UnboundedSender<Control<C>>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

/// Bind a UDP socket on the calling thread so address errors surface
/// synchronously.
pub fn bind(addr: SocketAddr) -> Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Start the I/O thread for `endpoint` on an already bound socket.
///
/// The runtime is built before the thread is spawned, so a failure to build
/// it is reported here rather than lost on the other thread.
pub fn spawn<E: Endpoint>(
    socket: std::net::UdpSocket,
    endpoint: E,
    config: &TransportConfig,
    thread_name: &str,
) -> Result<TransportHandle<E::Command>> {
    socket.set_nonblocking(true)?;
    let local_addr = socket.local_addr()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ProtocolError::SocketError(format!("{}: {e}", constants::ERR_RUNTIME_BUILD)))?;

    let (commands, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let settings = LoopSettings {
        recv_buffer_size: config.recv_buffer_size.max(1),
        retransmit_interval: config.retransmit_interval,
    };

    let loop_cancel = cancel.clone();
    let thread = thread::Builder::new()
        .name(thread_name.to_owned())
        .spawn(move || {
            runtime.block_on(async move {
                let socket = match UdpSocket::from_std(socket) {
                    Ok(socket) => socket,
                    Err(e) => {
                        warn!(error = %e, "Failed to register socket with runtime");
                        global_metrics().socket_error();
                        return;
                    }
                };
                run_loop(socket, endpoint, rx, loop_cancel, settings).await;
            });
        })
        .map_err(|e| ProtocolError::SocketError(format!("{}: {e}", constants::ERR_IO_THREAD_SPAWN)))?;

    info!(%local_addr, thread = thread_name, "Transport started");

    Ok(TransportHandle {
        commands,
        cancel,
        thread: Some(thread),
        local_addr,
    })
}

impl<C> TransportHandle<C> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a command for the I/O thread. Safe from any thread.
    pub fn post(&self, command: C) -> Result<()> {
        self.commands
            .send(Control::Command(command))
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished()) && !self.cancel.is_cancelled()
    }

    /// Stop the I/O thread: post `Shutdown` so queued commands drain and the
    /// socket closes on its own thread, cancel the loop, then join.
    ///
    /// Idempotent. Calling it from the I/O thread itself skips the join.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let _ = self.commands.send(Control::Shutdown);
        self.cancel.cancel();

        if thread.thread().id() == thread::current().id() {
            warn!("Transport shutdown requested from the I/O thread; not joining");
            return;
        }
        if thread.join().is_err() {
            warn!(local_addr = %self.local_addr, "I/O thread panicked");
        } else {
            debug!(local_addr = %self.local_addr, "Transport stopped");
        }
    }
}

impl<C> Drop for TransportHandle<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LoopSettings {
    recv_buffer_size: usize,
    retransmit_interval: Duration,
}

async fn run_loop<E: Endpoint>(
    socket: UdpSocket,
    mut endpoint: E,
    mut commands: mpsc::UnboundedReceiver<Control<E::Command>>,
    cancel: CancellationToken,
    settings: LoopSettings,
) {
    let mut buf = vec![0u8; settings.recv_buffer_size];
    let mut outbox = Outbox::new();
    let mut retransmit = (!settings.retransmit_interval.is_zero()).then(|| {
        let mut interval = tokio::time::interval(settings.retransmit_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    loop {
        // Commands first so a posted Shutdown drains everything queued before it.
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Control::Command(command)) => endpoint.on_command(command, &mut outbox),
                Some(Control::Shutdown) | None => {
                    endpoint.on_shutdown(&mut outbox);
                    flush(&socket, &mut outbox).await;
                    debug!("Transport loop received shutdown");
                    break;
                }
            },

            _ = cancel.cancelled() => {
                debug!("Transport loop cancelled");
                break;
            }

            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    global_metrics().datagram_received(len as u64);
                    trace!(%from, len, "Datagram received");
                    endpoint.on_datagram(&buf[..len], from, &mut outbox);
                }
                Err(e) => {
                    global_metrics().socket_error();
                    warn!(error = %e, "recv_from failed; re-arming");
                }
            },

            _ = next_tick(&mut retransmit) => endpoint.on_tick(&mut outbox),
        }

        flush(&socket, &mut outbox).await;
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn flush(socket: &UdpSocket, outbox: &mut Outbox) {
    for (datagram, to) in outbox.drain() {
        match socket.send_to(&datagram, to).await {
            Ok(sent) => {
                global_metrics().datagram_sent(sent as u64);
                trace!(%to, len = sent, "Datagram sent");
            }
            Err(e) => {
                global_metrics().socket_error();
                warn!(%to, error = %e, "send_to failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    /// Echoes datagrams back and reports commands through a std channel.
    struct Echo {
        seen: std_mpsc::Sender<String>,
    }

    impl Endpoint for Echo {
        type Command = (Vec<u8>, SocketAddr);

        fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, outbox: &mut Outbox) {
            outbox.push(datagram.to_vec(), from);
        }

        fn on_command(&mut self, (bytes, to): Self::Command, outbox: &mut Outbox) {
            let _ = self.seen.send(format!("command:{}", bytes.len()));
            outbox.push(bytes, to);
        }

        fn on_tick(&mut self, _outbox: &mut Outbox) {}

        fn on_shutdown(&mut self, _outbox: &mut Outbox) {
            let _ = self.seen.send("shutdown".into());
        }
    }

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            retransmit_interval: Duration::ZERO,
            ..TransportConfig::default()
        }
    }

    #[test]
    fn echoes_and_posts_then_shuts_down_in_order() {
        let (tx, rx) = std_mpsc::channel();
        let socket = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut handle = spawn(socket, Echo { seen: tx }, &loopback_config(), "rnp-test").unwrap();

        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        peer.send_to(b"hello", handle.local_addr()).unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        handle
            .post((b"posted".to_vec(), peer.local_addr().unwrap()))
            .unwrap();
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"posted");

        assert!(handle.is_running());
        handle.shutdown();
        handle.shutdown();
        assert!(!handle.is_running());

        let seen: Vec<String> = rx.try_iter().collect();
        assert_eq!(seen, vec!["command:6".to_string(), "shutdown".to_string()]);
        assert!(handle.post((vec![], peer.local_addr().unwrap())).is_err());
    }

    #[test]
    fn outbox_drains_in_push_order() {
        let mut outbox = Outbox::new();
        let to: SocketAddr = "127.0.0.1:9".parse().unwrap();
        outbox.push(vec![1], to);
        outbox.push(vec![2], to);
        let drained: Vec<_> = outbox.drain().map(|(b, _)| b[0]).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(outbox.is_empty());
    }
}
