//! # Packet Serialization
//!
//! Bounded scratch buffers for writing and reading packets.
//!
//! ## Design
//!
//! - One writer per thread, reset and reused for every packet
//! - Every write is checked against the configured limit (the MTU)
//! - All multi-byte values are little-endian

use crate::error::{NetError, NetResult};

/// Largest UDP payload the writer can be configured for.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Packet writer - appends to a reusable buffer bounded by `limit`.
pub struct PacketWriter {
    buffer: Vec<u8>,
    limit: usize,
}

impl PacketWriter {
    /// Creates a writer whose contents may never exceed `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.min(MAX_DATAGRAM_SIZE);
        Self {
            buffer: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Resets the writer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes left before the limit.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit - self.buffer.len()
    }

    /// Returns the configured limit.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    #[inline]
    fn reserve(&self, needed: usize) -> NetResult<()> {
        if needed > self.remaining() {
            return Err(NetError::BufferOverflow {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> NetResult<()> {
        self.reserve(1)?;
        self.buffer.push(value);
        Ok(())
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> NetResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> NetResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) -> NetResult<()> {
        self.write_u32(value.to_bits())
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> NetResult<()> {
        self.reserve(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }
}

/// Packet reader - consumes a received buffer front to back.
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a new reader over a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns the current read position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Reads `len` raw bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> NetResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(NetError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> NetResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> NetResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> NetResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a f32 in little-endian format.
    #[inline]
    pub fn read_f32(&mut self) -> NetResult<f32> {
        self.read_u32().map(f32::from_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut writer = PacketWriter::new(16);
        writer.write_u16(0x1e01).unwrap();
        writer.write_u32(0x0403_0201).unwrap();
        assert_eq!(writer.as_slice(), &[0x01, 0x1e, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_writer_respects_limit() {
        let mut writer = PacketWriter::new(5);
        writer.write_u32(7).unwrap();
        assert!(matches!(
            writer.write_u16(1),
            Err(NetError::BufferOverflow { needed: 2, remaining: 1 })
        ));
        // A failed write leaves the buffer untouched.
        assert_eq!(writer.len(), 4);
        writer.write_u8(9).unwrap();
        assert_eq!(writer.remaining(), 0);

        writer.reset();
        assert!(writer.is_empty());
    }

    #[test]
    fn test_reader_reports_truncation() {
        let data = [1u8, 2, 3];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
        assert!(matches!(
            reader.read_u32(),
            Err(NetError::Truncated { needed: 4, remaining: 1 })
        ));
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_mixed_values() {
        let mut writer = PacketWriter::new(64);
        writer.write_u8(0xAB).unwrap();
        writer.write_f32(1.5).unwrap();
        writer.write_bytes(b"hare").unwrap();

        let mut reader = PacketReader::new(writer.as_slice());
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert!((reader.read_f32().unwrap() - 1.5).abs() < f32::EPSILON);
        assert_eq!(reader.read_bytes(4).unwrap(), b"hare");
        assert_eq!(reader.position(), 9);
    }
}
