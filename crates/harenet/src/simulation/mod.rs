//! # Network Simulation
//!
//! Simulates unreliable networks for testing.
//!
//! ## Features
//!
//! - Random packet loss and duplication from a seeded RNG
//! - Scripted drop rules for exact scenarios ("drop the first reliable
//!   transmission")
//! - Counters shared with the test that built the transport

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;
use crate::transport::Transport;

/// Network conditions for simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConditions {
    /// Packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
    /// RNG seed, so a failing run can be replayed.
    pub seed: u64,
}

impl NetworkConditions {
    /// Perfect network conditions (LAN).
    pub const PERFECT: Self = Self {
        packet_loss_percent: 0,
        duplicate_percent: 0,
        seed: 0,
    };

    /// Average network conditions (cable).
    pub const AVERAGE: Self = Self {
        packet_loss_percent: 1,
        duplicate_percent: 1,
        seed: 0,
    };

    /// Poor network conditions (mobile/wifi).
    pub const POOR: Self = Self {
        packet_loss_percent: 5,
        duplicate_percent: 2,
        seed: 0,
    };

    /// Same conditions with another seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Returns true if a packet should be dropped.
    #[must_use]
    pub fn should_drop(&self, rng: &mut impl Rng) -> bool {
        rng.gen_range(0..100u8) < self.packet_loss_percent
    }

    /// Returns true if a packet should be sent twice.
    #[must_use]
    pub fn should_duplicate(&self, rng: &mut impl Rng) -> bool {
        rng.gen_range(0..100u8) < self.duplicate_percent
    }
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// Counters updated by a [`LossyTransport`].
#[derive(Debug, Default)]
pub struct SimulationStats {
    /// Datagrams handed to the inner transport.
    pub forwarded: AtomicU64,
    /// Datagrams dropped by loss or a drop rule.
    pub dropped: AtomicU64,
    /// Extra copies sent.
    pub duplicated: AtomicU64,
}

impl SimulationStats {
    /// Datagrams dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Datagrams forwarded so far.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Duplicates sent so far.
    #[must_use]
    pub fn duplicated(&self) -> u64 {
        self.duplicated.load(Ordering::Relaxed)
    }
}

/// Scripted drop decision, called with each outgoing datagram.
pub type DropRule = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Transport decorator that loses and duplicates outgoing datagrams.
pub struct LossyTransport<T> {
    inner: T,
    conditions: NetworkConditions,
    rng: StdRng,
    drop_rule: Option<DropRule>,
    stats: Arc<SimulationStats>,
}

impl<T: Transport> LossyTransport<T> {
    /// Wraps `inner` with the given conditions.
    #[must_use]
    pub fn new(inner: T, conditions: NetworkConditions) -> Self {
        let rng = StdRng::seed_from_u64(conditions.seed);
        Self {
            inner,
            conditions,
            rng,
            drop_rule: None,
            stats: Arc::new(SimulationStats::default()),
        }
    }

    /// Installs a rule; datagrams for which it returns true are dropped.
    #[must_use]
    pub fn with_drop_rule(mut self, rule: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        self.drop_rule = Some(Box::new(rule));
        self
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<SimulationStats> {
        Arc::clone(&self.stats)
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let scripted = self.drop_rule.as_mut().is_some_and(|rule| rule(data));
        if scripted || self.conditions.should_drop(&mut self.rng) {
            trace!("Simulation: dropping {} byte datagram to {}", data.len(), addr);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            // The sender never learns about the loss.
            return Ok(data.len());
        }

        let sent = self.inner.send_to(data, addr)?;
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        if self.conditions.should_duplicate(&mut self.rng) {
            self.inner.send_to(data, addr)?;
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
        }
        Ok(sent)
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        self.inner.recv_from(buf, wait)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
