//! # Sequence Arithmetic
//!
//! Packet sequence numbers wrap at 2^32. Ordering is decided by the signed
//! difference, so a sequence is newer when it lies less than 2^31 ahead.

/// Packet sequence number.
pub type SequenceNumber = u32;

/// Acknowledgment bitfield: bit `k` covers `acknowledge - 1 - k`.
pub type AckBitfield = u32;

/// Number of sequences covered by the ack history.
pub const ACK_HISTORY_BITS: u32 = 32;

/// Returns true if `sequence` is newer than `than`.
#[inline]
#[must_use]
pub const fn sequence_newer(sequence: SequenceNumber, than: SequenceNumber) -> bool {
    (sequence.wrapping_sub(than) as i32) > 0
}

/// Returns true if a packet sent with `sequence` is confirmed by a header
/// carrying `acknowledge` and `ack_history`.
#[inline]
#[must_use]
pub const fn is_acknowledged(
    sequence: SequenceNumber,
    acknowledge: SequenceNumber,
    ack_history: AckBitfield,
) -> bool {
    let behind = acknowledge.wrapping_sub(sequence);
    if behind == 0 {
        return true;
    }
    behind <= ACK_HISTORY_BITS && ack_history & (1 << (behind - 1)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_plain() {
        assert!(sequence_newer(7, 5));
        assert!(!sequence_newer(5, 7));
        assert!(!sequence_newer(6, 6));
    }

    #[test]
    fn test_newer_across_wrap() {
        assert!(sequence_newer(0, u32::MAX));
        assert!(sequence_newer(3, u32::MAX - 3));
        assert!(!sequence_newer(u32::MAX, 0));
        // Exactly half the space away counts as older.
        assert!(!sequence_newer(1 << 31, 0));
        assert!(sequence_newer((1 << 31) - 1, 0));
    }

    #[test]
    fn test_ack_exact() {
        assert!(is_acknowledged(10, 10, 0));
        assert!(!is_acknowledged(11, 10, u32::MAX));
    }

    #[test]
    fn test_ack_history_bits() {
        // bit 0 covers acknowledge - 1
        assert!(is_acknowledged(9, 10, 0b1));
        assert!(!is_acknowledged(8, 10, 0b1));
        assert!(is_acknowledged(8, 10, 0b10));
        // bit 31 covers acknowledge - 32
        assert!(is_acknowledged(100 - 32, 100, 1 << 31));
        assert!(!is_acknowledged(100 - 33, 100, u32::MAX));
    }

    #[test]
    fn test_ack_history_across_wrap() {
        assert!(is_acknowledged(u32::MAX, 0, 0b1));
        assert!(is_acknowledged(u32::MAX - 1, 1, 0b100));
    }

    #[test]
    fn test_single_ack_covers_thirty_three_sends() {
        let acknowledge = 1_000;
        let covered = (acknowledge - 40..=acknowledge)
            .filter(|&s| is_acknowledged(s, acknowledge, u32::MAX))
            .count();
        assert_eq!(covered, 33);
    }
}
