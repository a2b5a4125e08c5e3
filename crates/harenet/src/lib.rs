//! # harenet
//!
//! Connection-oriented messaging over UDP with optional per-message
//! reliability, for real-time applications such as multiplayer games.
//!
//! ## Architecture
//!
//! This crate implements the complete stack:
//!
//! - **Protocol**: 16-byte packet header, sequence/ack bookkeeping, framed envelopes
//! - **Connection**: handshake state machine, receive window, resend with adaptive timeout
//! - **Endpoint**: one network thread per endpoint, listener callbacks, delivery handles
//! - **Transport**: UDP datagrams, plus a lossy wrapper for simulation
//!
//! ## Packet Layout
//!
//! ```text
//! ┌──────────┬─────────┬──────┬──────────┬─────────────┬─────────────┐
//! │ protocol │ peer_id │ msgs │ sequence │ acknowledge │ ack_history │
//! │  u16 LE  │   u8    │  u8  │  u32 LE  │   u32 LE    │   u32 LE    │
//! ├──────────┴─────────┴──────┴──────────┴─────────────┴─────────────┤
//! │ envelope: [flags u8][size u16 LE][payload] × msgs                 │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use harenet::{Endpoint, NetConfig, RawMessageFactory, FLAG_RELIABLE};
//!
//! let client = Endpoint::client(NetConfig::default(), RawMessageFactory)?;
//! client.start()?;
//! client.connect("127.0.0.1:7777")?;
//! let handle = client.send(FLAG_RELIABLE, "hello")?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bit_array;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod protocol;
pub mod simulation;
pub mod transport;

pub use bit_array::BitArray;
pub use config::NetConfig;
pub use connection::{Connection, ConnectionState};
pub use endpoint::{ConnectionListener, DeliveryHandle, DeliveryStatus, Endpoint, EndpointRole};
pub use error::{NetError, NetResult};
pub use message::{
    MessageFactory, NetMessage, RawMessage, RawMessageFactory, FLAG_RELIABLE, FLAG_UNRELIABLE,
};
pub use protocol::{
    Envelope, EnvelopeKind, PacketReader, PacketWriter, ProtocolHeader, INVALID_PEER_ID,
    PROTOCOL_ID,
};
pub use simulation::{LossyTransport, NetworkConditions};
pub use transport::{Transport, UdpTransport};
