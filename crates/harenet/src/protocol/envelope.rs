//! # Message Envelopes
//!
//! Framed units following the header. Each envelope is
//!
//! ```text
//! ┌──────────────┬────────────┬─────────────────────┐
//! │ flags (1)    │ size (2)   │ payload (size)      │
//! └──────────────┴────────────┴─────────────────────┘
//! ```
//!
//! Flags bit 0 marks a reliable envelope, bits 1-3 hold the [`EnvelopeKind`].
//! The upper four bits are reserved and must be zero.

use std::sync::Arc;
use crate::error::{NetError, NetResult};
use super::serialization::{PacketReader, PacketWriter};

/// Flags byte bit for reliable envelopes.
const RELIABLE_BIT: u8 = 1 << 0;
/// Flags byte bits holding the kind.
const KIND_SHIFT: u8 = 1;
const KIND_MASK: u8 = 0b0000_1110;
const RESERVED_MASK: u8 = 0b1111_0000;

/// What an envelope carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Application payload, handed to the message factory.
    Payload = 0,
    /// Client -> Server: connection request.
    ConnectRequest = 1,
    /// Server -> Client: connection accepted, peer id in the header.
    ConnectAccepted = 2,
    /// Server -> Client: peer limit reached.
    ServerFull = 3,
    /// Bidirectional: disconnect notice.
    Disconnect = 4,
    /// Bidirectional: keep-alive.
    Heartbeat = 5,
}

impl EnvelopeKind {
    /// Decodes a kind from its wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Payload),
            1 => Some(Self::ConnectRequest),
            2 => Some(Self::ConnectAccepted),
            3 => Some(Self::ServerFull),
            4 => Some(Self::Disconnect),
            5 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Contents shared by both envelope variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// What the frame carries.
    pub kind: EnvelopeKind,
    /// Encoded bytes. Shared so a broadcast does not copy per peer.
    pub payload: Arc<[u8]>,
}

/// A framed message inside a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// Tracked until acknowledged, resent on timeout.
    Reliable(Frame),
    /// Fire-and-forget.
    Unreliable(Frame),
}

impl Envelope {
    /// Size of the envelope header in bytes.
    pub const HEADER_SIZE: usize = 1 + 2;

    /// Largest payload an envelope can describe.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    /// Creates an envelope with the given reliability.
    #[must_use]
    pub fn new(reliable: bool, kind: EnvelopeKind, payload: Arc<[u8]>) -> Self {
        let frame = Frame { kind, payload };
        if reliable {
            Self::Reliable(frame)
        } else {
            Self::Unreliable(frame)
        }
    }

    /// Creates a payload-free control envelope.
    #[must_use]
    pub fn control(reliable: bool, kind: EnvelopeKind) -> Self {
        Self::new(reliable, kind, Arc::from(&[][..]))
    }

    /// Returns the shared frame.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> &Frame {
        match self {
            Self::Reliable(frame) | Self::Unreliable(frame) => frame,
        }
    }

    /// Returns true for reliable envelopes.
    #[inline]
    #[must_use]
    pub const fn is_reliable(&self) -> bool {
        matches!(self, Self::Reliable(_))
    }

    /// Returns the envelope kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        self.frame().kind
    }

    /// Returns the encoded payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.frame().payload
    }

    /// Returns the payload size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.frame().payload.len()
    }

    /// Bytes this envelope occupies on the wire.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.size()
    }

    fn flags(&self) -> u8 {
        let reliable = if self.is_reliable() { RELIABLE_BIT } else { 0 };
        reliable | ((self.kind() as u8) << KIND_SHIFT)
    }

    /// Serializes the envelope.
    pub fn write_to(&self, writer: &mut PacketWriter) -> NetResult<()> {
        let size = u16::try_from(self.size()).map_err(|_| NetError::MessageTooLarge {
            size: self.size(),
            limit: Self::MAX_PAYLOAD,
        })?;
        if self.encoded_len() > writer.remaining() {
            return Err(NetError::BufferOverflow {
                needed: self.encoded_len(),
                remaining: writer.remaining(),
            });
        }
        writer.write_u8(self.flags())?;
        writer.write_u16(size)?;
        writer.write_bytes(self.payload())
    }

    /// Reads one envelope.
    pub fn read_from(reader: &mut PacketReader<'_>) -> NetResult<Self> {
        let flags = reader.read_u8()?;
        if flags & RESERVED_MASK != 0 {
            return Err(NetError::MalformedEnvelope(flags));
        }
        let kind = EnvelopeKind::from_u8((flags & KIND_MASK) >> KIND_SHIFT)
            .ok_or(NetError::MalformedEnvelope(flags))?;
        let size = usize::from(reader.read_u16()?);
        let payload = reader.read_bytes(size)?;
        Ok(Self::new(flags & RELIABLE_BIT != 0, kind, Arc::from(payload)))
    }
}
