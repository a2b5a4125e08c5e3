//! # Network Error Types
//!
//! All errors that can surface from the harenet transport.
//!
//! Most protocol-level faults (bad magic, truncated datagrams, duplicates) never
//! reach the application: the network thread logs and drops them. The variants
//! here are what the parsing layer reports internally and what the public API
//! returns from `start`, `send` and friends.

use std::io;
use thiserror::Error;

/// Errors that can occur in the transport.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket-level failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// The buffer ended before a complete field could be read.
    #[error("truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the field being read.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A write would exceed the scratch buffer limit.
    #[error("buffer overflow: writing {needed} bytes with {remaining} remaining")]
    BufferOverflow {
        /// Bytes the write required.
        needed: usize,
        /// Bytes left before the limit.
        remaining: usize,
    },

    /// An envelope header carried an unknown kind or reserved flag bits.
    #[error("malformed envelope flags: {0:#04x}")]
    MalformedEnvelope(u8),

    /// The packet structure did not match its header.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// An encoded message does not fit into a single packet.
    #[error("message too large: {size} bytes, limit {limit}")]
    MessageTooLarge {
        /// Encoded size of the message.
        size: usize,
        /// Largest payload a packet can carry.
        limit: usize,
    },

    /// No connection with the given peer id.
    #[error("unknown peer: {0}")]
    UnknownPeer(u8),

    /// The operation is not available for this endpoint's role.
    #[error("operation requires a {0} endpoint")]
    WrongRole(&'static str),

    /// The endpoint's network thread is not running.
    #[error("endpoint is not running")]
    NotRunning,

    /// The endpoint was stopped and its socket released.
    #[error("endpoint is closed")]
    Closed,

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type for transport operations.
pub type NetResult<T> = Result<T, NetError>;
