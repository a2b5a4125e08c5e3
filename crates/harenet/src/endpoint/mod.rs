//! # Endpoint
//!
//! The application-facing side of harenet.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ APPLICATION THREAD                                          │
//! │  send / send_to ──encode──► Command ─┐                      │
//! │  connect / disconnect ───────────────┤ crossbeam channel    │
//! ├──────────────────────────────────────▼──────────────────────┤
//! │ NETWORK THREAD (one per endpoint)                           │
//! │  transport ◄──► connections ──► ConnectionListener events   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Outbound packets are only ever built on the network thread. The
//! application thread encodes messages into envelopes and hands them over.
//!
//! ## Example
//!
//! ```rust,ignore
//! use harenet::{Endpoint, NetConfig, RawMessageFactory, FLAG_RELIABLE};
//!
//! let server = Endpoint::server(NetConfig::default(), RawMessageFactory, "0.0.0.0:7777")?;
//! server.add_connection_listener(Arc::new(MyListener));
//! server.start()?;
//! server.send(FLAG_RELIABLE, "welcome")?;
//! ```

mod delivery;
mod listener;
mod network_loop;
mod tick;

pub use delivery::{DeliveryHandle, DeliveryStatus};
pub(crate) use delivery::DeliveryTicket;
pub use listener::ConnectionListener;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use crate::config::NetConfig;
use crate::error::{NetError, NetResult};
use crate::message::{write_message, MessageFactory, NetMessage};
use crate::protocol::PacketWriter;
use crate::transport::{Transport, UdpTransport};
use network_loop::{Command, NetworkLoop, Shared, Target};

/// Which side of the handshake an endpoint plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointRole {
    /// Accepts connection requests and assigns peer ids.
    Server,
    /// Connects to a server.
    Client,
}

/// Parts handed back by a finished network thread.
type Parts<F> = (F, Box<dyn Transport>);

/// A running network thread.
struct NetworkThread<F> {
    handle: JoinHandle<Parts<F>>,
    shutdown: Arc<AtomicBool>,
    done: Receiver<()>,
    commands: Sender<Command>,
}

enum Lifecycle<F> {
    /// Constructed or torn down for restart; owns the transport.
    Idle(Parts<F>),
    Running(NetworkThread<F>),
    /// Stopped; the transport is released.
    Closed,
}

/// A harenet endpoint: server or client.
pub struct Endpoint<F: MessageFactory> {
    config: NetConfig,
    role: EndpointRole,
    local_addr: Option<SocketAddr>,
    shared: Arc<Shared<F::Message>>,
    lifecycle: Mutex<Lifecycle<F>>,
    /// Application-side encode buffer.
    scratch: Mutex<PacketWriter>,
}

impl<F: MessageFactory> Endpoint<F> {
    /// Creates a server bound to `bind_addr`.
    pub fn server(config: NetConfig, factory: F, bind_addr: impl ToSocketAddrs) -> NetResult<Self> {
        let transport = UdpTransport::bind(bind_addr)?;
        Self::with_transport(EndpointRole::Server, config, factory, transport)
    }

    /// Creates a client on an ephemeral local port.
    pub fn client(config: NetConfig, factory: F) -> NetResult<Self> {
        let transport = UdpTransport::ephemeral()?;
        Self::with_transport(EndpointRole::Client, config, factory, transport)
    }

    /// Creates an endpoint over any transport.
    pub fn with_transport(
        role: EndpointRole,
        config: NetConfig,
        factory: F,
        transport: impl Transport,
    ) -> NetResult<Self> {
        config.validate()?;
        let local_addr = transport.local_addr().ok();
        let scratch = PacketWriter::new(config.max_message_size());
        let transport: Box<dyn Transport> = Box::new(transport);
        Ok(Self {
            config,
            role,
            local_addr,
            shared: Arc::new(Shared::new()),
            lifecycle: Mutex::new(Lifecycle::Idle((factory, transport))),
            scratch: Mutex::new(scratch),
        })
    }

    /// Server or client.
    #[must_use]
    pub const fn role(&self) -> EndpointRole {
        self.role
    }

    /// Local address of the transport.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Returns true while the network thread runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Peer ids currently connected, ascending.
    #[must_use]
    pub fn connected_peers(&self) -> Vec<u8> {
        self.shared.peers.read().iter().copied().collect()
    }

    /// Starts the network thread.
    ///
    /// A thread that is already running is stopped first, which disconnects
    /// its peers. Fails with [`NetError::Closed`] after [`Self::stop`].
    pub fn start(&self) -> NetResult<()> {
        // The lock is not held across the join: listeners may call back in.
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed);
        let parts = match previous {
            Lifecycle::Idle(parts) => parts,
            Lifecycle::Running(thread) => {
                info!("Restarting network thread");
                self.join(thread).ok_or(NetError::Closed)?
            }
            Lifecycle::Closed => return Err(NetError::Closed),
        };
        let thread = self.spawn(parts)?;
        *self.lifecycle.lock() = Lifecycle::Running(thread);
        Ok(())
    }

    fn spawn(&self, (factory, transport): Parts<F>) -> NetResult<NetworkThread<F>> {
        let (commands, command_rx) = unbounded();
        let (done_tx, done) = bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let network = NetworkLoop::new(
            self.config.clone(),
            self.role,
            factory,
            transport,
            command_rx,
            Arc::clone(&self.shared),
            Arc::clone(&shutdown),
        );

        let handle = thread::Builder::new()
            .name("harenet-network".into())
            .spawn(move || {
                let parts = network.run();
                let _ = done_tx.send(());
                parts
            })?;

        Ok(NetworkThread {
            handle,
            shutdown,
            done,
            commands,
        })
    }

    /// Signals the thread and waits up to the join timeout.
    ///
    /// Returns the parts on a clean exit. A thread that does not stop in time
    /// is abandoned.
    fn join(&self, thread: NetworkThread<F>) -> Option<Parts<F>> {
        thread.shutdown.store(true, Ordering::Release);
        let timeout = self.config.join_timeout();
        if let Err(RecvTimeoutError::Timeout) = thread.done.recv_timeout(timeout) {
            warn!(
                "Network thread did not stop within {:?}; leaking it and its socket",
                timeout
            );
            return None;
        }
        match thread.handle.join() {
            Ok(parts) => Some(parts),
            Err(_) => {
                error!("Network thread panicked");
                None
            }
        }
    }

    /// Stops the network thread and releases the transport.
    ///
    /// Connected peers get a disconnect notice and `on_disconnected` fires for
    /// each. Never fails; an unresponsive thread is logged and abandoned.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed);
        match previous {
            Lifecycle::Running(thread) => {
                drop(self.join(thread));
                info!("Endpoint stopped");
            }
            Lifecycle::Idle(parts) => drop(parts),
            Lifecycle::Closed => {}
        }
    }

    fn command(&self, command: Command) -> NetResult<()> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(thread) => thread
                .commands
                .send(command)
                .map_err(|_| NetError::NotRunning),
            Lifecycle::Idle(_) => Err(NetError::NotRunning),
            Lifecycle::Closed => Err(NetError::Closed),
        }
    }

    /// Opens a connection to a server. Client only.
    ///
    /// Completion is reported through `on_connected` or, when the server
    /// is full, `on_server_full`.
    pub fn connect(&self, addr: impl ToSocketAddrs) -> NetResult<()> {
        if self.role != EndpointRole::Client {
            return Err(NetError::WrongRole("client"));
        }
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))?;
        self.command(Command::Connect(addr))
    }

    /// Closes the connection with `peer_id`.
    pub fn disconnect(&self, peer_id: u8) -> NetResult<()> {
        if !self.shared.peers.read().contains(&peer_id) {
            return Err(NetError::UnknownPeer(peer_id));
        }
        self.command(Command::Disconnect(peer_id))
    }

    /// Closes every connection.
    pub fn disconnect_all(&self) -> NetResult<()> {
        self.command(Command::DisconnectAll)
    }

    /// Sends `message` to every connected peer (the server, on a client).
    ///
    /// `flags` selects reliability, see [`crate::FLAG_RELIABLE`].
    pub fn send<M>(&self, flags: u32, message: &M) -> NetResult<DeliveryHandle>
    where
        M: NetMessage + ?Sized,
    {
        self.submit(Target::Connected, flags, message)
    }

    /// Sends `message` to one peer.
    pub fn send_to<M>(&self, flags: u32, message: &M, peer_id: u8) -> NetResult<DeliveryHandle>
    where
        M: NetMessage + ?Sized,
    {
        if !self.shared.peers.read().contains(&peer_id) {
            return Err(NetError::UnknownPeer(peer_id));
        }
        self.submit(Target::Peer(peer_id), flags, message)
    }

    fn submit<M>(&self, target: Target, flags: u32, message: &M) -> NetResult<DeliveryHandle>
    where
        M: NetMessage + ?Sized,
    {
        let envelope = {
            let mut scratch = self.scratch.lock();
            write_message(flags, message, &mut scratch, self.config.max_message_size())?
        };
        let (handle, ticket) = DeliveryHandle::new();
        self.command(Command::Send {
            target,
            envelope,
            ticket,
        })?;
        Ok(handle)
    }

    /// Registers a listener. Listeners fire in registration order.
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener<F::Message>>) {
        self.shared.listeners.add(listener);
    }

    /// Unregisters a listener previously added, matched by identity.
    pub fn remove_connection_listener(
        &self,
        listener: &Arc<dyn ConnectionListener<F::Message>>,
    ) -> bool {
        self.shared.listeners.remove(listener)
    }
}

impl<F: MessageFactory> Drop for Endpoint<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use crate::message::RawMessageFactory;

    /// Transport whose receive blocks well past any tick deadline.
    struct StallingTransport;

    impl Transport for StallingTransport {
        fn send_to(&mut self, data: &[u8], _addr: SocketAddr) -> io::Result<usize> {
            Ok(data.len())
        }

        fn recv_from(
            &mut self,
            _buf: &mut [u8],
            _wait: Duration,
        ) -> io::Result<Option<(usize, SocketAddr)>> {
            thread::sleep(Duration::from_secs(2));
            Ok(None)
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:7001".parse().unwrap())
        }
    }

    fn server() -> Endpoint<RawMessageFactory> {
        Endpoint::server(NetConfig::default(), RawMessageFactory, "127.0.0.1:0").unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = NetConfig {
            poll_rate: 0,
            ..NetConfig::default()
        };
        assert!(matches!(
            Endpoint::server(config, RawMessageFactory, "127.0.0.1:0"),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_send_before_start() {
        let endpoint = server();
        assert!(!endpoint.is_running());
        assert!(matches!(endpoint.send(0, "x"), Err(NetError::NotRunning)));
    }

    #[test]
    fn test_start_stop_then_closed() {
        let endpoint = server();
        assert!(endpoint.local_addr().is_some());
        endpoint.start().unwrap();
        assert!(endpoint.is_running());
        // Restart tears the old thread down and keeps the socket.
        endpoint.start().unwrap();
        assert!(endpoint.is_running());

        endpoint.stop();
        assert!(!endpoint.is_running());
        assert!(matches!(endpoint.start(), Err(NetError::Closed)));
        assert!(matches!(endpoint.send(0, "x"), Err(NetError::Closed)));
        // Stopping twice is harmless.
        endpoint.stop();
    }

    #[test]
    fn test_stop_abandons_stuck_thread() {
        let config = NetConfig {
            join_timeout_ms: 50,
            ..NetConfig::default()
        };
        let endpoint =
            Endpoint::with_transport(EndpointRole::Server, config, RawMessageFactory, StallingTransport)
                .unwrap();
        endpoint.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let began = Instant::now();
        endpoint.stop();
        assert!(began.elapsed() < Duration::from_secs(1));
        assert!(!endpoint.is_running());
        assert!(matches!(endpoint.start(), Err(NetError::Closed)));
    }

    #[test]
    fn test_role_checks() {
        let endpoint = server();
        endpoint.start().unwrap();
        assert!(matches!(
            endpoint.connect("127.0.0.1:1"),
            Err(NetError::WrongRole("client"))
        ));
        assert!(matches!(
            endpoint.send_to(0, "x", 9),
            Err(NetError::UnknownPeer(9))
        ));
        assert!(matches!(endpoint.disconnect(9), Err(NetError::UnknownPeer(9))));
    }

    #[test]
    fn test_broadcast_without_peers_fails_handle() {
        let endpoint = server();
        endpoint.start().unwrap();
        let handle = endpoint.send(crate::FLAG_RELIABLE, "nobody").unwrap();
        assert_eq!(
            handle.wait_timeout(std::time::Duration::from_secs(2)),
            DeliveryStatus::Failed
        );
    }

    #[test]
    fn test_message_too_large() {
        let endpoint = server();
        endpoint.start().unwrap();
        let big = vec![0u8; endpoint.config().max_message_size() + 1];
        assert!(matches!(
            endpoint.send(0, big.as_slice()),
            Err(NetError::MessageTooLarge { .. })
        ));
    }
}
