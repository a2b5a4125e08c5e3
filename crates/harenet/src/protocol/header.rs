//! # Protocol Header
//!
//! Fixed 16-byte header prefixed to every datagram.
//!
//! ```text
//! ┌────────────┬────────┬──────────┬───────────────┬─────────────┬──────────────┐
//! │ protocol   │ peer   │ message  │ send          │ acknowledge │ ack          │
//! │ id (2)     │ id (1) │ count (1)│ sequence (4)  │ (4)         │ history (4)  │
//! └────────────┴────────┴──────────┴───────────────┴─────────────┴──────────────┘
//! ```
//!
//! Bit `k` of `ack_history` means `acknowledge - 1 - k` was also received.

use crate::error::NetResult;
use super::serialization::{PacketReader, PacketWriter};

/// Magic constant identifying harenet datagrams.
pub const PROTOCOL_ID: u16 = 0x1e01;

/// Peer id carried before the server has assigned one.
pub const INVALID_PEER_ID: u8 = 0xFF;

/// Packet header - present in every datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Magic, equals [`PROTOCOL_ID`] on valid packets.
    pub protocol_id: u16,
    /// Assigned peer id of the link, or [`INVALID_PEER_ID`].
    pub peer_id: u8,
    /// Number of envelopes following the header.
    pub number_of_messages: u8,
    /// Sequence number of this packet.
    pub send_sequence: u32,
    /// Highest remote sequence number observed by the sender.
    pub acknowledge: u32,
    /// Receipt bitmap for the 32 sequences below `acknowledge`.
    pub ack_history: u32,
}

impl ProtocolHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 2 + 1 + 1 + 4 + 4 + 4;

    /// Creates a reset (invalid) header.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protocol_id: 0,
            peer_id: INVALID_PEER_ID,
            number_of_messages: 0,
            send_sequence: 0,
            acknowledge: 0,
            ack_history: 0,
        }
    }

    /// Returns true if the protocol id matches.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.protocol_id == PROTOCOL_ID
    }

    /// Stamps the protocol id.
    #[inline]
    pub fn make_valid(&mut self) {
        self.protocol_id = PROTOCOL_ID;
    }

    /// Returns every field to its initial state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Size of the header in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        Self::SIZE
    }

    /// Serializes the header.
    pub fn write_to(&self, writer: &mut PacketWriter) -> NetResult<()> {
        writer.write_u16(self.protocol_id)?;
        writer.write_u8(self.peer_id)?;
        writer.write_u8(self.number_of_messages)?;
        writer.write_u32(self.send_sequence)?;
        writer.write_u32(self.acknowledge)?;
        writer.write_u32(self.ack_history)
    }

    /// Reads the header, overwriting every field.
    ///
    /// Fails with `Truncated` when fewer than [`Self::SIZE`] bytes remain; the
    /// header is left untouched in that case.
    pub fn read_from(&mut self, reader: &mut PacketReader<'_>) -> NetResult<()> {
        let mut fields = PacketReader::new(reader.read_bytes(Self::SIZE)?);
        self.protocol_id = fields.read_u16()?;
        self.peer_id = fields.read_u8()?;
        self.number_of_messages = fields.read_u8()?;
        self.send_sequence = fields.read_u32()?;
        self.acknowledge = fields.read_u32()?;
        self.ack_history = fields.read_u32()?;
        Ok(())
    }
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;

    fn populated() -> ProtocolHeader {
        let mut header = ProtocolHeader::new();
        header.make_valid();
        header.peer_id = 7;
        header.number_of_messages = 3;
        header.send_sequence = 0xDEAD_BEEF;
        header.acknowledge = u32::MAX;
        header.ack_history = 0x8000_0001;
        header
    }

    #[test]
    fn test_fresh_header_is_invalid() {
        let header = ProtocolHeader::new();
        assert!(!header.is_valid());
        assert_eq!(header.peer_id, INVALID_PEER_ID);
        assert_eq!(header.size(), 16);
    }

    #[test]
    fn test_make_valid_and_reset() {
        let mut header = populated();
        assert!(header.is_valid());
        header.reset();
        assert!(!header.is_valid());
        assert_eq!(header, ProtocolHeader::default());
    }

    #[test]
    fn test_round_trip() {
        let header = populated();
        let mut writer = PacketWriter::new(64);
        header.write_to(&mut writer).unwrap();
        assert_eq!(writer.len(), ProtocolHeader::SIZE);

        let mut decoded = ProtocolHeader::new();
        decoded.read_from(&mut PacketReader::new(writer.as_slice())).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_wrong_magic_is_invalid() {
        let mut header = populated();
        header.protocol_id = 0x1e02;
        let mut writer = PacketWriter::new(64);
        header.write_to(&mut writer).unwrap();

        let mut decoded = ProtocolHeader::new();
        decoded.read_from(&mut PacketReader::new(writer.as_slice())).unwrap();
        assert!(!decoded.is_valid());
    }

    #[test]
    fn test_truncated_header() {
        let mut writer = PacketWriter::new(64);
        populated().write_to(&mut writer).unwrap();

        let mut decoded = ProtocolHeader::new();
        let result = decoded.read_from(&mut PacketReader::new(&writer.as_slice()[..15]));
        assert!(matches!(result, Err(NetError::Truncated { needed: 16, remaining: 15 })));
        assert!(!decoded.is_valid());
    }
}
