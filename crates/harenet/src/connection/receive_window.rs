//! # Receive Window
//!
//! Remembers which recent peer sequences arrived, so the next outgoing
//! header can report `acknowledge` and a 32-bit `ack_history`.
//!
//! ```text
//!   slot = sequence % 256
//!
//!   ... | h-33 | h-32 | ... | h-2 | h-1 | h |
//!              └──── ack_history ─────┘   └ acknowledge
//!               bit 31          bit 1  bit 0
//! ```
//!
//! Only sequences newer than the current highest are recorded. Slots the
//! highest sequence skips over are cleared, so a slot never reports a
//! sequence from a previous lap.

use crate::bit_array::BitArray;
use crate::protocol::{sequence_newer, AckBitfield, SequenceNumber, ACK_HISTORY_BITS};

/// Number of tracked sequences.
pub const WINDOW_SIZE: usize = 256;

/// Sliding record of received packet sequences.
#[derive(Clone, Debug)]
pub struct ReceiveWindow {
    highest: Option<SequenceNumber>,
    received: BitArray,
}

impl ReceiveWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            highest: None,
            received: BitArray::new(WINDOW_SIZE),
        }
    }

    #[inline]
    fn slot(sequence: SequenceNumber) -> usize {
        sequence as usize % WINDOW_SIZE
    }

    /// Records an arriving sequence.
    ///
    /// Returns true if the packet is newer than everything seen so far and
    /// should be processed. Stale and duplicate sequences return false and
    /// leave the window untouched.
    pub fn record(&mut self, sequence: SequenceNumber) -> bool {
        match self.highest {
            None => {
                self.received.clear();
            }
            Some(highest) if sequence_newer(sequence, highest) => {
                let advance = sequence.wrapping_sub(highest) as usize;
                if advance >= WINDOW_SIZE {
                    self.received.clear();
                } else {
                    for step in 1..advance {
                        let skipped = highest.wrapping_add(step as u32);
                        self.received.set_bit_to(Self::slot(skipped), false);
                    }
                }
            }
            Some(_) => return false,
        }
        self.received.set_bit(Self::slot(sequence));
        self.highest = Some(sequence);
        true
    }

    /// Highest sequence received, or 0 before anything arrived.
    #[must_use]
    pub fn acknowledge(&self) -> SequenceNumber {
        self.highest.unwrap_or(0)
    }

    /// Bitmap of the 32 sequences preceding [`Self::acknowledge`].
    #[must_use]
    pub fn ack_history(&self) -> AckBitfield {
        let Some(highest) = self.highest else {
            return 0;
        };
        (0..ACK_HISTORY_BITS).fold(0, |bits, k| {
            let sequence = highest.wrapping_sub(1 + k);
            if self.received.get_bit(Self::slot(sequence)) {
                bits | (1 << k)
            } else {
                bits
            }
        })
    }

    /// Returns true if `sequence` is recorded and still inside the window.
    #[must_use]
    pub fn contains(&self, sequence: SequenceNumber) -> bool {
        match self.highest {
            Some(highest) => {
                let behind = highest.wrapping_sub(sequence) as usize;
                behind < WINDOW_SIZE && self.received.get_bit(Self::slot(sequence))
            }
            None => false,
        }
    }
}

impl Default for ReceiveWindow {
    fn default() -> Self {
        Self::new()
    }
}
