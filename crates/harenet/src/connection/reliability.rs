//! # Reliable Delivery
//!
//! Reliable envelopes are remembered under the sequence of the packet that
//! carried them. An acknowledgment for that sequence settles them; a packet
//! that stays unacknowledged past the resend timeout hands its envelopes back
//! so they can ride in the next outgoing packet under a fresh sequence.
//!
//! ```text
//!   queue ──send──► in flight[seq] ──ack──► settled
//!     ▲                   │
//!     └──── timeout ──────┘   (attempts += 1 per transmission)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};
use crate::endpoint::DeliveryTicket;
use crate::protocol::{is_acknowledged, AckBitfield, Envelope, SequenceNumber};

/// Initial round-trip estimate before any sample.
pub const INITIAL_RTT: Duration = Duration::from_millis(100);

/// A reliable envelope awaiting acknowledgment.
pub(crate) struct PendingReliable {
    pub(crate) envelope: Envelope,
    pub(crate) ticket: Option<DeliveryTicket>,
    /// Transmissions so far.
    pub(crate) attempts: u32,
}

impl PendingReliable {
    pub(crate) fn new(envelope: Envelope, ticket: Option<DeliveryTicket>) -> Self {
        Self {
            envelope,
            ticket,
            attempts: 0,
        }
    }

    fn settle(self) {
        if let Some(ticket) = self.ticket {
            ticket.settle();
        }
    }
}

struct InFlightPacket {
    sent_at: Instant,
    entries: Vec<PendingReliable>,
}

/// Per-connection table of unacknowledged reliable envelopes.
pub(crate) struct ReliableTracker {
    in_flight: HashMap<SequenceNumber, InFlightPacket>,
    rtt: Duration,
    min_resend_timeout: Duration,
}

impl ReliableTracker {
    pub(crate) fn new(min_resend_timeout: Duration) -> Self {
        Self {
            in_flight: HashMap::new(),
            rtt: INITIAL_RTT,
            min_resend_timeout,
        }
    }

    /// Smoothed round-trip time.
    pub(crate) const fn rtt(&self) -> Duration {
        self.rtt
    }

    /// Current resend timeout, `max(min_resend_timeout, 2 * rtt)`.
    pub(crate) fn resend_timeout(&self) -> Duration {
        self.min_resend_timeout.max(self.rtt * 2)
    }

    /// Number of packets awaiting acknowledgment.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// How far the oldest unacknowledged packet lies behind `sequence`.
    pub(crate) fn oldest_behind(&self, sequence: SequenceNumber) -> Option<u32> {
        self.in_flight
            .keys()
            .map(|&in_flight| sequence.wrapping_sub(in_flight))
            .max()
    }

    /// Remembers the reliable envelopes carried by packet `sequence`.
    pub(crate) fn on_sent(
        &mut self,
        sequence: SequenceNumber,
        now: Instant,
        mut entries: Vec<PendingReliable>,
    ) {
        if entries.is_empty() {
            return;
        }
        for entry in &mut entries {
            entry.attempts += 1;
        }
        self.in_flight.insert(sequence, InFlightPacket { sent_at: now, entries });
    }

    /// Settles every packet covered by a peer header. Returns how many
    /// packets were settled.
    pub(crate) fn on_ack(
        &mut self,
        acknowledge: SequenceNumber,
        ack_history: AckBitfield,
        now: Instant,
    ) -> usize {
        let acked: Vec<SequenceNumber> = self
            .in_flight
            .keys()
            .copied()
            .filter(|&sequence| is_acknowledged(sequence, acknowledge, ack_history))
            .collect();

        for sequence in &acked {
            let Some(packet) = self.in_flight.remove(sequence) else {
                continue;
            };
            // Retransmitted envelopes give ambiguous samples.
            if packet.entries.iter().all(|entry| entry.attempts == 1) {
                self.sample_rtt(now.saturating_duration_since(packet.sent_at));
            }
            for entry in packet.entries {
                entry.settle();
            }
        }
        acked.len()
    }

    fn sample_rtt(&mut self, sample: Duration) {
        // Rolling average
        self.rtt = (self.rtt * 7 + sample) / 8;
    }

    /// Removes packets older than the resend timeout and returns their
    /// envelopes, oldest sequence first.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<PendingReliable> {
        let timeout = self.resend_timeout();
        let mut expired: Vec<(Instant, SequenceNumber)> = self
            .in_flight
            .iter()
            .filter(|(_, packet)| now.saturating_duration_since(packet.sent_at) >= timeout)
            .map(|(&sequence, packet)| (packet.sent_at, sequence))
            .collect();
        expired.sort_unstable();

        expired
            .into_iter()
            .filter_map(|(_, sequence)| self.in_flight.remove(&sequence))
            .flat_map(|packet| packet.entries)
            .collect()
    }

    /// Abandons everything in flight. Unsettled tickets fail on drop.
    pub(crate) fn clear(&mut self) {
        self.in_flight.clear();
    }
}
