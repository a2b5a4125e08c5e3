//! # Peer Connections
//!
//! One [`Connection`] per remote address, owned by the network thread.
//!
//! ## Lifecycle
//!
//! ```text
//!  Disconnected ──connect──► Connecting ──accepted──► Connected
//!       ▲                        │                        │
//!       │                   handshake timeout     timeout / disconnect
//!       │                        ▼                        ▼
//!       └────────── linger ◄─ Disconnecting ◄─────────────┘
//! ```
//!
//! A connection carries its own send sequence, a receive window for
//! acknowledgments, the in-flight reliable table and the outbound queues.
//! Listeners only see the read-only accessors.

mod receive_window;
mod reliability;

pub use receive_window::{ReceiveWindow, WINDOW_SIZE};
pub use reliability::INITIAL_RTT;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use crate::config::NetConfig;
use crate::endpoint::{DeliveryHandle, DeliveryTicket};
use crate::error::NetResult;
use crate::protocol::{
    write_packet, Envelope, PacketWriter, ProtocolHeader, SequenceNumber, ACK_HISTORY_BITS,
    INVALID_PEER_ID,
};
use reliability::{PendingReliable, ReliableTracker};

/// State of a peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Closed, pending removal.
    Disconnected = 0,
    /// Handshake in progress.
    Connecting = 1,
    /// Fully connected and active.
    Connected = 2,
    /// Disconnect notice sent, flushing acks before close.
    Disconnecting = 3,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Unreliable envelope with its optional delivery ticket.
type QueuedUnreliable = (Envelope, Option<DeliveryTicket>);

/// Most envelopes one header can announce.
const MAX_ENVELOPES_PER_PACKET: usize = u8::MAX as usize;

/// A peer connection.
pub struct Connection {
    peer_id: u8,
    addr: SocketAddr,
    state: ConnectionState,
    state_since: Instant,
    was_connected: bool,
    send_sequence: SequenceNumber,
    window: ReceiveWindow,
    reliability: ReliableTracker,
    reliable_queue: VecDeque<PendingReliable>,
    unreliable_queue: VecDeque<QueuedUnreliable>,
    last_received: Instant,
    last_sent: Instant,
    ack_pending: bool,
    /// Settles when the peer acknowledges our handshake envelope.
    handshake: Option<DeliveryHandle>,
}

impl Connection {
    /// Creates a connection in `state`.
    pub(crate) fn new(
        peer_id: u8,
        addr: SocketAddr,
        state: ConnectionState,
        now: Instant,
        config: &NetConfig,
    ) -> Self {
        Self {
            peer_id,
            addr,
            state,
            state_since: now,
            was_connected: state == ConnectionState::Connected,
            send_sequence: 0,
            window: ReceiveWindow::new(),
            reliability: ReliableTracker::new(config.min_resend_timeout()),
            reliable_queue: VecDeque::new(),
            unreliable_queue: VecDeque::new(),
            last_received: now,
            last_sent: now,
            ack_pending: false,
            handshake: None,
        }
    }

    /// Peer id assigned by the server, [`INVALID_PEER_ID`] until known.
    #[inline]
    #[must_use]
    pub const fn peer_id(&self) -> u8 {
        self.peer_id
    }

    /// Remote address.
    #[inline]
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true while connected.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Smoothed round-trip estimate.
    #[must_use]
    pub const fn rtt(&self) -> Duration {
        self.reliability.rtt()
    }

    /// Returns true if the connection ever reached `Connected`.
    pub(crate) const fn was_connected(&self) -> bool {
        self.was_connected
    }

    pub(crate) fn assign_peer_id(&mut self, peer_id: u8) {
        self.peer_id = peer_id;
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState, now: Instant) {
        if self.state == state {
            return;
        }
        debug!(
            "Connection {} (peer {}): {:?} -> {:?}",
            self.addr, self.peer_id, self.state, state
        );
        self.state = state;
        self.state_since = now;
        if state == ConnectionState::Connected {
            self.was_connected = true;
        }
    }

    /// Time spent in the current state.
    pub(crate) fn state_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_since)
    }

    /// Time since the peer was last heard from.
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    /// Time since a packet was last written for this peer.
    pub(crate) fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_sent)
    }

    /// Queues an envelope for the next outgoing packet.
    pub(crate) fn queue(&mut self, envelope: Envelope, ticket: Option<DeliveryTicket>) {
        if envelope.is_reliable() {
            self.reliable_queue
                .push_back(PendingReliable::new(envelope, ticket));
        } else {
            self.unreliable_queue.push_back((envelope, ticket));
        }
    }

    /// Returns true if envelopes or an acknowledgment are waiting.
    pub(crate) fn has_outbound(&self) -> bool {
        self.ack_pending || !self.reliable_queue.is_empty() || !self.unreliable_queue.is_empty()
    }

    /// Queues a reliable handshake envelope whose acknowledgment
    /// [`Self::handshake_acknowledged`] reports.
    pub(crate) fn queue_handshake(&mut self, envelope: Envelope) {
        let (handle, ticket) = DeliveryHandle::new();
        self.queue(envelope, Some(ticket));
        self.handshake = Some(handle);
    }

    /// Returns true once the peer acknowledged the handshake envelope.
    pub(crate) fn handshake_acknowledged(&self) -> bool {
        self.handshake
            .as_ref()
            .is_some_and(DeliveryHandle::is_delivered)
    }

    /// Reliable envelopes not yet acknowledged, queued or in flight.
    #[cfg(test)]
    pub(crate) fn unacknowledged(&self) -> usize {
        self.reliable_queue.len() + self.reliability.in_flight()
    }

    /// Consumes the acknowledgment fields of a peer header.
    pub(crate) fn process_acks(&mut self, header: &ProtocolHeader, now: Instant) {
        self.last_received = now;
        self.reliability
            .on_ack(header.acknowledge, header.ack_history, now);
    }

    /// Records a peer sequence in the receive window. Returns true if the
    /// packet is fresh and its envelopes should be delivered.
    ///
    /// Only a fresh packet carrying a reliable envelope owes an ack.
    pub(crate) fn record(&mut self, sequence: SequenceNumber, carries_reliable: bool) -> bool {
        let fresh = self.window.record(sequence);
        if fresh && carries_reliable {
            self.ack_pending = true;
        }
        fresh
    }

    /// Moves timed-out reliable envelopes back to the front of the queue.
    ///
    /// Returns false once an envelope has used up `max_attempts`
    /// transmissions; its delivery fails.
    pub(crate) fn requeue_expired(&mut self, now: Instant, max_attempts: u32) -> bool {
        let expired = self.reliability.take_expired(now);
        if expired.is_empty() {
            return true;
        }
        if expired.iter().any(|entry| entry.attempts >= max_attempts) {
            warn!(
                "Connection {} (peer {}): reliable envelope unacknowledged after {} attempts",
                self.addr, self.peer_id, max_attempts
            );
            return false;
        }
        debug!(
            "Connection {} (peer {}): resending {} reliable envelope(s)",
            self.addr,
            self.peer_id,
            expired.len()
        );
        for entry in expired.into_iter().rev() {
            self.reliable_queue.push_front(entry);
        }
        true
    }

    const fn peek_sequence(&self) -> SequenceNumber {
        match self.send_sequence.wrapping_add(1) {
            // 0 is what an empty receive window acknowledges.
            0 => 1,
            sequence => sequence,
        }
    }

    fn next_sequence(&mut self) -> SequenceNumber {
        self.send_sequence = self.peek_sequence();
        self.send_sequence
    }

    /// Returns true when one more packet would push the oldest in-flight
    /// packet out of reach of the peer's acknowledge and ack history.
    ///
    /// At most `ACK_HISTORY_BITS + 1` sequences may be unacknowledged.
    fn ack_window_full(&self) -> bool {
        self.reliability
            .oldest_behind(self.peek_sequence())
            .is_some_and(|behind| behind > ACK_HISTORY_BITS)
    }

    /// Writes the next packet for this peer into `writer`.
    ///
    /// Returns `None` when nothing is due. Otherwise returns the tickets of
    /// the unreliable envelopes written, to be settled once the datagram
    /// leaves the transport.
    pub(crate) fn write_next_packet(
        &mut self,
        writer: &mut PacketWriter,
        now: Instant,
    ) -> NetResult<Option<Vec<DeliveryTicket>>> {
        if !self.has_outbound() {
            return Ok(None);
        }
        if self.ack_window_full() {
            if !self.ack_pending {
                trace!(
                    "Connection {} (peer {}): ack window full, holding packets",
                    self.addr, self.peer_id
                );
                return Ok(None);
            }
            self.write_ack_only(writer, now)?;
            return Ok(Some(Vec::new()));
        }

        let mut budget = writer.limit().saturating_sub(ProtocolHeader::SIZE);
        let mut reliable = Vec::new();
        let mut unreliable = Vec::new();

        while let Some(entry) = self.reliable_queue.front() {
            let len = entry.envelope.encoded_len();
            if len > budget || reliable.len() >= MAX_ENVELOPES_PER_PACKET {
                break;
            }
            budget -= len;
            if let Some(entry) = self.reliable_queue.pop_front() {
                reliable.push(entry);
            }
        }
        while let Some((envelope, _)) = self.unreliable_queue.front() {
            let len = envelope.encoded_len();
            if len > budget || reliable.len() + unreliable.len() >= MAX_ENVELOPES_PER_PACKET {
                break;
            }
            budget -= len;
            if let Some(queued) = self.unreliable_queue.pop_front() {
                unreliable.push(queued);
            }
        }
        self.drop_oversized(reliable.is_empty() && unreliable.is_empty());

        let envelopes: Vec<Envelope> = reliable
            .iter()
            .map(|entry| entry.envelope.clone())
            .chain(unreliable.iter().map(|(envelope, _)| envelope.clone()))
            .collect();

        let sequence = self.next_sequence();
        let mut header = ProtocolHeader::new();
        header.make_valid();
        header.peer_id = self.peer_id;
        header.send_sequence = sequence;
        header.acknowledge = self.window.acknowledge();
        header.ack_history = self.window.ack_history();

        if let Err(e) = write_packet(writer, &mut header, envelopes.iter()) {
            for entry in reliable.into_iter().rev() {
                self.reliable_queue.push_front(entry);
            }
            return Err(e);
        }

        self.reliability.on_sent(sequence, now, reliable);
        self.last_sent = now;
        self.ack_pending = false;
        Ok(Some(
            unreliable
                .into_iter()
                .filter_map(|(_, ticket)| ticket)
                .collect(),
        ))
    }

    /// Writes an envelope-free packet under the last sequence sent.
    ///
    /// The peer reads the acknowledgment fields and drops the packet as a
    /// duplicate, so the ack window does not grow.
    fn write_ack_only(&mut self, writer: &mut PacketWriter, now: Instant) -> NetResult<()> {
        let mut header = ProtocolHeader::new();
        header.make_valid();
        header.peer_id = self.peer_id;
        header.send_sequence = self.send_sequence;
        header.acknowledge = self.window.acknowledge();
        header.ack_history = self.window.ack_history();
        write_packet(writer, &mut header, std::iter::empty::<&Envelope>())?;
        self.last_sent = now;
        self.ack_pending = false;
        Ok(())
    }

    /// Discards a queue head that cannot fit even an empty packet.
    fn drop_oversized(&mut self, nothing_taken: bool) {
        if !nothing_taken {
            return;
        }
        if let Some(entry) = self.reliable_queue.pop_front() {
            warn!(
                "Connection {}: dropping {} byte reliable envelope larger than the mtu",
                self.addr,
                entry.envelope.size()
            );
        } else if let Some((envelope, _)) = self.unreliable_queue.pop_front() {
            warn!(
                "Connection {}: dropping {} byte envelope larger than the mtu",
                self.addr,
                envelope.size()
            );
        }
    }

    /// Drops every queued and in-flight envelope, failing their deliveries.
    pub(crate) fn abandon(&mut self) {
        self.reliable_queue.clear();
        self.unreliable_queue.clear();
        self.reliability.clear();
        self.ack_pending = false;
        self.handshake = None;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_id", &self.peer_id)
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("rtt", &self.rtt())
            .finish()
    }
}

impl Connection {
    /// Placeholder handed to `on_server_full` listeners for a rejected peer.
    pub(crate) fn rejected(addr: SocketAddr, now: Instant, config: &NetConfig) -> Self {
        Self::new(INVALID_PEER_ID, addr, ConnectionState::Disconnected, now, config)
    }
}
