//! # Transport Layer
//!
//! Datagram I/O beneath the protocol.
//!
//! ## Design
//!
//! - [`Transport`] is the seam the endpoint talks to
//! - [`UdpTransport`] wraps a std UDP socket with bounded blocking receives
//! - Decorators (see `simulation`) wrap any transport for testing

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Shortest receive wait; the socket rejects a zero timeout.
const MIN_RECV_WAIT: Duration = Duration::from_millis(1);

/// Unreliable datagram transport.
pub trait Transport: Send + 'static {
    /// Sends one datagram.
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Receives one datagram into `buf`, blocking at most `wait`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv_from(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Local address the transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// UDP socket wrapper.
///
/// Blocking socket with a per-call read timeout, plus packet statistics.
pub struct UdpTransport {
    /// The underlying socket.
    socket: UdpSocket,
    /// Local address.
    local_addr: SocketAddr,
    /// Read timeout currently set on the socket.
    read_timeout: Option<Duration>,
    /// Statistics.
    stats: TransportStats,
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
}

impl UdpTransport {
    /// Creates a transport bound to `addr`.
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            read_timeout: None,
            stats: TransportStats::default(),
        })
    }

    /// Creates a transport on an ephemeral port of the unspecified address.
    pub fn ephemeral() -> io::Result<Self> {
        Self::bind(("0.0.0.0", 0))
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TransportStats::default();
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match self.socket.send_to(data, addr) {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e)
            }
        }
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        let wait = wait.max(MIN_RECV_WAIT);
        if self.read_timeout != Some(wait) {
            self.socket.set_read_timeout(Some(wait))?;
            self.read_timeout = Some(wait);
        }

        match self.socket.recv_from(buf) {
            Ok((len, addr)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += len as u64;
                Ok(Some((len, addr)))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => {
                self.stats.recv_errors += 1;
                Err(e)
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, addr)
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).recv_from(buf, wait)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}
