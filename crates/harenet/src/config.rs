//! # Network Configuration
//!
//! Plain scalar settings consumed by the endpoint. Loaded once at startup,
//! usually from a TOML file; every field has a default.
//!
//! ```toml
//! poll_rate = 30
//! max_peers = 8
//! inactivity_timeout_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::error::{NetError, NetResult};
use crate::protocol::{Envelope, ProtocolHeader, INVALID_PEER_ID, MAX_DATAGRAM_SIZE};

/// Smallest MTU accepted by [`NetConfig::validate`].
pub const MIN_MTU: usize = 64;

/// Endpoint configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetConfig {
    /// Network thread ticks per second.
    pub poll_rate: u32,
    /// Maximum number of concurrently connected peers (server side).
    pub max_peers: usize,
    /// Silence after which a connected peer is dropped.
    pub inactivity_timeout_ms: u64,
    /// Time a connection may stay in the handshake.
    pub handshake_timeout_ms: u64,
    /// Lower bound for the reliable resend timeout.
    pub min_resend_timeout_ms: u64,
    /// Transmissions of one reliable envelope before the peer is dropped.
    pub max_resend_attempts: u32,
    /// Idle time after which a keep-alive is sent.
    pub heartbeat_interval_ms: u64,
    /// Time a disconnecting connection keeps flushing acks.
    pub disconnect_linger_ms: u64,
    /// Largest datagram the endpoint will write.
    pub mtu: usize,
    /// Bounded wait for the network thread on `stop`.
    pub join_timeout_ms: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            poll_rate: 30,
            max_peers: 16,
            inactivity_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,
            min_resend_timeout_ms: 100,
            max_resend_attempts: 10,
            heartbeat_interval_ms: 1_000,
            disconnect_linger_ms: 200,
            mtu: 1200,
            join_timeout_ms: 5_000,
        }
    }
}

impl NetConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> NetResult<()> {
        if self.poll_rate == 0 || self.poll_rate > 1000 {
            return Err(NetError::InvalidConfig(format!(
                "poll_rate must be in 1..=1000, was {}",
                self.poll_rate
            )));
        }
        if self.max_peers == 0 || self.max_peers > usize::from(INVALID_PEER_ID) {
            return Err(NetError::InvalidConfig(format!(
                "max_peers must be in 1..={}, was {}",
                INVALID_PEER_ID, self.max_peers
            )));
        }
        if self.mtu < MIN_MTU || self.mtu > MAX_DATAGRAM_SIZE {
            return Err(NetError::InvalidConfig(format!(
                "mtu must be in {MIN_MTU}..={MAX_DATAGRAM_SIZE}, was {}",
                self.mtu
            )));
        }
        if self.max_resend_attempts == 0 {
            return Err(NetError::InvalidConfig("max_resend_attempts must be positive".into()));
        }
        if self.min_resend_timeout_ms == 0 {
            return Err(NetError::InvalidConfig("min_resend_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Duration of one poll tick.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.poll_rate.max(1)))
    }

    /// Inactivity timeout.
    #[must_use]
    pub const fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    /// Handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Minimum resend timeout.
    #[must_use]
    pub const fn min_resend_timeout(&self) -> Duration {
        Duration::from_millis(self.min_resend_timeout_ms)
    }

    /// Heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Disconnect linger time.
    #[must_use]
    pub const fn disconnect_linger(&self) -> Duration {
        Duration::from_millis(self.disconnect_linger_ms)
    }

    /// Thread join timeout.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Largest application payload that fits into a single packet.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.mtu
            .saturating_sub(ProtocolHeader::SIZE + Envelope::HEADER_SIZE)
            .min(Envelope::MAX_PAYLOAD)
    }
}
