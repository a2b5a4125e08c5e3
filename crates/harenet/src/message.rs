//! # Application Messages
//!
//! The transport never interprets application payloads. Outbound messages
//! implement [`NetMessage`] to encode themselves; inbound payloads are turned
//! back into objects by a [`MessageFactory`].

use std::sync::Arc;
use crate::error::{NetError, NetResult};
use crate::protocol::{Envelope, EnvelopeKind, PacketReader, PacketWriter};

/// Send flag: no flags, best-effort delivery.
pub const FLAG_UNRELIABLE: u32 = 0;

/// Send flag: guarantee eventual delivery with resend.
pub const FLAG_RELIABLE: u32 = 1 << 0;

/// An application payload that can encode itself.
pub trait NetMessage {
    /// Writes the encoded message.
    fn write(&self, writer: &mut PacketWriter) -> NetResult<()>;
}

/// Decodes application payloads received from the network.
///
/// Called on the network thread.
pub trait MessageFactory: Send + 'static {
    /// Decoded message type handed to listeners.
    type Message: 'static;

    /// Reads one message from an envelope payload.
    fn read_message(&self, reader: &mut PacketReader<'_>) -> NetResult<Self::Message>;
}

/// Encodes `message` into `scratch` and wraps it in an envelope.
///
/// The envelope is reliable when `flags` contains [`FLAG_RELIABLE`]. Fails with
/// `MessageTooLarge` when the encoded size exceeds `limit`.
pub fn write_message<M>(
    flags: u32,
    message: &M,
    scratch: &mut PacketWriter,
    limit: usize,
) -> NetResult<Envelope>
where
    M: NetMessage + ?Sized,
{
    scratch.reset();
    message.write(scratch).map_err(|e| match e {
        NetError::BufferOverflow { needed, .. } => NetError::MessageTooLarge {
            size: scratch.len() + needed,
            limit,
        },
        other => other,
    })?;

    let size = scratch.len();
    let limit = limit.min(Envelope::MAX_PAYLOAD);
    if size > limit {
        return Err(NetError::MessageTooLarge { size, limit });
    }

    Ok(Envelope::new(
        flags & FLAG_RELIABLE != 0,
        EnvelopeKind::Payload,
        Arc::from(scratch.as_slice()),
    ))
}

/// Extracts the application payload from a received envelope.
pub fn read_message<F: MessageFactory + ?Sized>(
    factory: &F,
    envelope: &Envelope,
) -> NetResult<F::Message> {
    factory.read_message(&mut PacketReader::new(envelope.payload()))
}

/// Uninterpreted byte payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage(pub Vec<u8>);

impl RawMessage {
    /// Creates a message from bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl NetMessage for RawMessage {
    fn write(&self, writer: &mut PacketWriter) -> NetResult<()> {
        writer.write_bytes(&self.0)
    }
}

impl NetMessage for [u8] {
    fn write(&self, writer: &mut PacketWriter) -> NetResult<()> {
        writer.write_bytes(self)
    }
}

impl NetMessage for str {
    fn write(&self, writer: &mut PacketWriter) -> NetResult<()> {
        writer.write_bytes(self.as_bytes())
    }
}

/// Factory producing [`RawMessage`]s from whole payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawMessageFactory;

impl MessageFactory for RawMessageFactory {
    type Message = RawMessage;

    fn read_message(&self, reader: &mut PacketReader<'_>) -> NetResult<RawMessage> {
        let bytes = reader.read_bytes(reader.remaining())?;
        Ok(RawMessage(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_DATAGRAM_SIZE;

    /// Fixed-layout message used to check factory decoding.
    #[derive(Debug, PartialEq)]
    struct Move {
        player: u8,
        x: f32,
    }

    impl NetMessage for Move {
        fn write(&self, writer: &mut PacketWriter) -> NetResult<()> {
            writer.write_u8(self.player)?;
            writer.write_f32(self.x)
        }
    }

    struct MoveFactory;

    impl MessageFactory for MoveFactory {
        type Message = Move;

        fn read_message(&self, reader: &mut PacketReader<'_>) -> NetResult<Move> {
            Ok(Move {
                player: reader.read_u8()?,
                x: reader.read_f32()?,
            })
        }
    }

    #[test]
    fn test_reliable_flag_selects_variant() {
        let mut scratch = PacketWriter::new(MAX_DATAGRAM_SIZE);
        let reliable = write_message(FLAG_RELIABLE, "hi", &mut scratch, 100).unwrap();
        let unreliable = write_message(FLAG_UNRELIABLE, "hi", &mut scratch, 100).unwrap();
        assert!(matches!(reliable, Envelope::Reliable(_)));
        assert!(matches!(unreliable, Envelope::Unreliable(_)));
        assert_eq!(reliable.size(), 2);
        assert_eq!(reliable.kind(), EnvelopeKind::Payload);
    }

    #[test]
    fn test_typed_round_trip() {
        let mut scratch = PacketWriter::new(MAX_DATAGRAM_SIZE);
        let message = Move { player: 3, x: -2.5 };
        let envelope = write_message(FLAG_RELIABLE, &message, &mut scratch, 100).unwrap();
        assert_eq!(envelope.size(), 5);
        assert_eq!(read_message(&MoveFactory, &envelope).unwrap(), message);
    }

    #[test]
    fn test_too_large() {
        let mut scratch = PacketWriter::new(MAX_DATAGRAM_SIZE);
        let big = RawMessage::new(vec![0u8; 200]);
        assert!(matches!(
            write_message(FLAG_UNRELIABLE, &big, &mut scratch, 100),
            Err(NetError::MessageTooLarge { size: 200, limit: 100 })
        ));

        let mut small_scratch = PacketWriter::new(10);
        assert!(matches!(
            write_message(FLAG_UNRELIABLE, &big, &mut small_scratch, 100),
            Err(NetError::MessageTooLarge { size: 200, .. })
        ));
    }

    #[test]
    fn test_raw_factory_takes_whole_payload() {
        let mut scratch = PacketWriter::new(MAX_DATAGRAM_SIZE);
        let envelope = write_message(FLAG_UNRELIABLE, &b"\x00\x01\x02"[..], &mut scratch, 100).unwrap();
        let decoded = read_message(&RawMessageFactory, &envelope).unwrap();
        assert_eq!(decoded.as_bytes(), &[0, 1, 2]);
    }
}
