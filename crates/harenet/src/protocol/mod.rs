//! # Network Protocol
//!
//! Binary packet layout for harenet.
//!
//! ## Packet Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ProtocolHeader (16 bytes)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Envelope 0 │ Envelope 1 │ ... │ Envelope n-1                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `n` is the header's `number_of_messages`. A datagram whose magic, envelope
//! count or length does not line up is discarded as a whole.

mod envelope;
mod header;
mod sequence;
mod serialization;

pub use envelope::{Envelope, EnvelopeKind, Frame};
pub use header::{ProtocolHeader, INVALID_PEER_ID, PROTOCOL_ID};
pub use sequence::{
    is_acknowledged, sequence_newer, AckBitfield, SequenceNumber, ACK_HISTORY_BITS,
};
pub use serialization::{PacketReader, PacketWriter, MAX_DATAGRAM_SIZE};

use crate::error::{NetError, NetResult};

/// Parses a complete datagram into `header` and `envelopes`.
///
/// Both outputs are scratch state owned by the caller; they are reset first.
/// The header is parsed even when the magic is wrong so callers can log it,
/// but no envelope is read unless `header.is_valid()`.
pub fn read_packet(
    data: &[u8],
    header: &mut ProtocolHeader,
    envelopes: &mut Vec<Envelope>,
) -> NetResult<()> {
    header.reset();
    envelopes.clear();

    let mut reader = PacketReader::new(data);
    header.read_from(&mut reader)?;
    if !header.is_valid() {
        return Err(NetError::MalformedPacket("protocol id mismatch"));
    }
    for _ in 0..header.number_of_messages {
        envelopes.push(Envelope::read_from(&mut reader)?);
    }
    if reader.remaining() != 0 {
        return Err(NetError::MalformedPacket("trailing bytes after envelopes"));
    }
    Ok(())
}

/// Writes `header` followed by `envelopes`.
///
/// The header's `number_of_messages` is taken from `envelopes.len()`.
pub fn write_packet<'a, I>(
    writer: &mut PacketWriter,
    header: &mut ProtocolHeader,
    envelopes: I,
) -> NetResult<()>
where
    I: ExactSizeIterator<Item = &'a Envelope>,
{
    header.number_of_messages = u8::try_from(envelopes.len())
        .map_err(|_| NetError::MalformedPacket("more than 255 envelopes"))?;
    writer.reset();
    header.write_to(writer)?;
    for envelope in envelopes {
        envelope.write_to(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_header() -> ProtocolHeader {
        let mut header = ProtocolHeader::new();
        header.make_valid();
        header.peer_id = 2;
        header.send_sequence = 41;
        header.acknowledge = 17;
        header.ack_history = 0b1011;
        header
    }

    #[test]
    fn test_packet_round_trip() {
        let envelopes = vec![
            Envelope::new(true, EnvelopeKind::Payload, Arc::from(&b"fire"[..])),
            Envelope::control(false, EnvelopeKind::Heartbeat),
        ];
        let mut writer = PacketWriter::new(1200);
        let mut header = sample_header();
        write_packet(&mut writer, &mut header, envelopes.iter()).unwrap();
        assert_eq!(header.number_of_messages, 2);
        assert_eq!(writer.len(), ProtocolHeader::SIZE + 7 + 3);

        let mut parsed_header = ProtocolHeader::new();
        let mut parsed = Vec::new();
        read_packet(writer.as_slice(), &mut parsed_header, &mut parsed).unwrap();
        assert_eq!(parsed_header, header);
        assert_eq!(parsed, envelopes);
    }

    #[test]
    fn test_bad_magic_reads_no_envelopes() {
        let mut writer = PacketWriter::new(1200);
        let mut header = sample_header();
        header.protocol_id = 0xBEEF;
        let envelopes = [Envelope::control(true, EnvelopeKind::ConnectRequest)];
        write_packet(&mut writer, &mut header, envelopes.iter()).unwrap();

        let mut parsed_header = ProtocolHeader::new();
        let mut parsed = Vec::new();
        assert!(read_packet(writer.as_slice(), &mut parsed_header, &mut parsed).is_err());
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let mut writer = PacketWriter::new(1200);
        let mut header = sample_header();
        let envelopes = [Envelope::control(true, EnvelopeKind::Heartbeat)];
        write_packet(&mut writer, &mut header, envelopes.iter()).unwrap();

        // Claim two envelopes while only one follows.
        let mut bytes = writer.as_slice().to_vec();
        bytes[3] = 2;
        let mut parsed_header = ProtocolHeader::new();
        let mut parsed = Vec::new();
        assert!(matches!(
            read_packet(&bytes, &mut parsed_header, &mut parsed),
            Err(NetError::Truncated { .. })
        ));

        // Claim zero while one follows.
        bytes[3] = 0;
        assert!(matches!(
            read_packet(&bytes, &mut parsed_header, &mut parsed),
            Err(NetError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut parsed_header = ProtocolHeader::new();
        let mut parsed = Vec::new();
        assert!(read_packet(&[0xFF; 5], &mut parsed_header, &mut parsed).is_err());
        assert!(read_packet(&[], &mut parsed_header, &mut parsed).is_err());
    }
}
