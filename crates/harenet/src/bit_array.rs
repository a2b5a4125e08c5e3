//! # Bit Array
//!
//! Fixed-capacity bit vector backed by 32-bit words.
//!
//! Bit `i` lives in word `i / 32` at offset `i % 32`. The addressable capacity
//! is the requested bit count rounded up to whole bytes, so `BitArray::new(33)`
//! reports 5 bytes and 40 bits even though it keeps two words internally.
//! Bits past the capacity are never observable.

use std::fmt;

/// Bits per backing word.
const WORD_BITS: usize = 32;

/// Fixed-size bit vector.
#[derive(Clone, PartialEq, Eq)]
pub struct BitArray {
    /// Backing words, `ceil(requested / 32)` of them.
    data: Vec<u32>,
    /// Addressable bits (whole bytes).
    capacity: usize,
}

impl BitArray {
    /// Creates a zeroed bit array able to hold at least `number_of_bits` bits.
    #[must_use]
    pub fn new(number_of_bits: usize) -> Self {
        let bytes = number_of_bits.div_ceil(8);
        Self {
            data: vec![0; number_of_bits.div_ceil(WORD_BITS)],
            capacity: bytes * 8,
        }
    }

    /// Returns the bit at `index`, or false when out of capacity.
    #[inline]
    #[must_use]
    pub fn get_bit(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        self.data[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Sets the bit at `index`.
    #[inline]
    pub fn set_bit(&mut self, index: usize) {
        self.set_bit_to(index, true);
    }

    /// Sets or clears the bit at `index`. Writes out of capacity are ignored.
    #[inline]
    pub fn set_bit_to(&mut self, index: usize, value: bool) {
        if index >= self.capacity {
            return;
        }
        let mask = 1 << (index % WORD_BITS);
        let word = &mut self.data[index / WORD_BITS];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Sets every addressable bit.
    pub fn set_all(&mut self) {
        self.data.fill(u32::MAX);
        let tail = self.capacity % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.data.last_mut() {
                *last = (1 << tail) - 1;
            }
        }
    }

    /// Number of addressable bytes.
    #[inline]
    #[must_use]
    pub const fn number_of_bytes(&self) -> usize {
        self.capacity / 8
    }

    /// Number of addressable bits.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.capacity
    }

    /// Backing words.
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.data
    }

    /// Returns backing word `index`, or 0 when out of range.
    #[inline]
    #[must_use]
    pub fn word(&self, index: usize) -> u32 {
        self.data.get(index).copied().unwrap_or(0)
    }
}

impl fmt::Debug for BitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitArray[{}](", self.capacity)?;
        for (i, word) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{word:032b}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let bits = BitArray::new(33);
        assert_eq!(bits.words(), &[0, 0]);
        assert!((0..bits.size()).all(|i| !bits.get_bit(i)));
    }

    #[test]
    fn test_sizes_round_to_whole_bytes() {
        assert_eq!(BitArray::new(33).number_of_bytes(), 5);
        assert_eq!(BitArray::new(33).size(), 40);
        assert_eq!(BitArray::new(31).number_of_bytes(), 4);
        assert_eq!(BitArray::new(1500).number_of_bytes(), 188);
        assert_eq!(BitArray::new(255).number_of_bytes(), 32);
        assert_eq!(BitArray::new(256).number_of_bytes(), 32);
        assert_eq!(BitArray::new(64).number_of_bytes(), 8);
        assert_eq!(BitArray::new(32).number_of_bytes(), 4);
        assert_eq!(BitArray::new(32).size(), 32);
        assert_eq!(BitArray::new(0).size(), 0);
    }

    #[test]
    fn test_bit_layout() {
        let mut bits = BitArray::new(64);
        bits.set_bit(0);
        bits.set_bit(31);
        bits.set_bit(32);
        assert_eq!(bits.word(0), 0x8000_0001);
        assert_eq!(bits.word(1), 1);
        assert!(bits.get_bit(31));
        assert!(!bits.get_bit(30));
    }

    #[test]
    fn test_set_and_clear_single_bit() {
        let mut bits = BitArray::new(32);
        assert!(!bits.get_bit(4));
        bits.set_bit_to(4, true);
        bits.set_bit_to(4, true);
        assert!(bits.get_bit(4));
        for i in (0..bits.size()).filter(|&i| i != 4) {
            assert!(!bits.get_bit(i));
        }
        bits.set_bit_to(4, false);
        assert!(!bits.get_bit(4));
    }

    #[test]
    fn test_out_of_capacity() {
        let mut bits = BitArray::new(33);
        bits.set_bit(40);
        bits.set_bit(63);
        assert!(!bits.get_bit(40));
        assert!(!bits.get_bit(1000));
        assert_eq!(bits.word(1), 0);
        bits.set_bit(39);
        assert!(bits.get_bit(39));
    }

    #[test]
    fn test_set_all_and_clear() {
        let mut bits = BitArray::new(33);
        bits.set_all();
        assert_eq!(bits.word(0), 0xFFFF_FFFF);
        assert!((0..bits.size()).all(|i| bits.get_bit(i)));
        assert!(!bits.get_bit(40));

        bits.clear();
        assert_eq!(bits.words(), &[0, 0]);
        assert!((0..bits.size()).all(|i| !bits.get_bit(i)));
    }
}
