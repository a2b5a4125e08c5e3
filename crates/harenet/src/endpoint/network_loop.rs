//! # Network Thread
//!
//! Owns the transport and every [`Connection`] for one endpoint.
//!
//! ## Tick
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ 1. receive datagrams until the tick deadline               │
//! │ 2. drain application commands (connect / send / close)     │
//! │ 3. resend timers, heartbeats, state timeouts               │
//! │ 4. write due packets                                       │
//! │ 5. remove closed connections, fire on_disconnected         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors while handling a datagram or a tick are logged and the loop keeps
//! going. Listener callbacks run inline on this thread.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};
use crate::config::NetConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::NetResult;
use crate::message::{read_message, MessageFactory};
use crate::protocol::{
    read_packet, Envelope, EnvelopeKind, PacketWriter, ProtocolHeader, INVALID_PEER_ID,
    MAX_DATAGRAM_SIZE,
};
use crate::transport::Transport;
use super::delivery::DeliveryTicket;
use super::listener::ListenerList;
use super::tick::TickClock;
use super::EndpointRole;

/// Who a send command goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    /// Every connected peer (the server, on a client).
    Connected,
    /// One connected peer.
    Peer(u8),
}

/// Application-thread request for the network thread.
pub(crate) enum Command {
    /// Open a connection (client).
    Connect(SocketAddr),
    /// Close the connection with the given peer.
    Disconnect(u8),
    /// Close every connection.
    DisconnectAll,
    /// Queue an envelope.
    Send {
        target: Target,
        envelope: Envelope,
        ticket: DeliveryTicket,
    },
}

/// State shared between the endpoint handle and its network thread.
pub(crate) struct Shared<M> {
    pub(crate) listeners: ListenerList<M>,
    /// Peer ids currently connected.
    pub(crate) peers: RwLock<BTreeSet<u8>>,
}

impl<M: 'static> Shared<M> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: ListenerList::new(),
            peers: RwLock::new(BTreeSet::new()),
        }
    }
}

/// The network thread's state.
pub(crate) struct NetworkLoop<F: MessageFactory> {
    config: NetConfig,
    role: EndpointRole,
    factory: F,
    transport: Box<dyn Transport>,
    commands: Receiver<Command>,
    shared: Arc<Shared<F::Message>>,
    shutdown: Arc<AtomicBool>,
    connections: HashMap<SocketAddr, Connection>,
    clock: TickClock,
    recv_buf: Vec<u8>,
    writer: PacketWriter,
    header: ProtocolHeader,
    envelopes: Vec<Envelope>,
}

impl<F: MessageFactory> NetworkLoop<F> {
    pub(crate) fn new(
        config: NetConfig,
        role: EndpointRole,
        factory: F,
        transport: Box<dyn Transport>,
        commands: Receiver<Command>,
        shared: Arc<Shared<F::Message>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let clock = TickClock::new(config.poll_interval());
        let writer = PacketWriter::new(config.mtu);
        Self {
            config,
            role,
            factory,
            transport,
            commands,
            shared,
            shutdown,
            connections: HashMap::new(),
            clock,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            writer,
            header: ProtocolHeader::new(),
            envelopes: Vec::new(),
        }
    }

    /// Runs until the shutdown flag is set, then finalizes every connection.
    ///
    /// Hands back the factory and transport for a restart.
    pub(crate) fn run(mut self) -> (F, Box<dyn Transport>) {
        info!(
            "Network thread started ({:?}, {} Hz)",
            self.role, self.config.poll_rate
        );

        while !self.shutdown.load(Ordering::Acquire) {
            let deadline = self.clock.begin_tick();
            self.receive_until(deadline);

            let work_start = Instant::now();
            self.drain_commands(work_start);
            self.update_connections(work_start);
            self.flush(work_start);
            self.remove_closed();
            self.clock.end_tick(work_start);
        }

        self.close_all();
        let stats = self.clock.stats();
        debug!(
            "Network thread stopped after {} ticks (avg work {}us, {} late)",
            self.clock.tick_count(),
            stats.avg_work_us,
            stats.late_ticks
        );
        (self.factory, self.transport)
    }

    fn receive_until(&mut self, deadline: Instant) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            match self.transport.recv_from(&mut self.recv_buf, deadline - now) {
                Ok(Some((len, from))) => {
                    if let Err(e) = self.handle_datagram(len, from) {
                        debug!("Dropping datagram from {}: {}", from, e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Wait out the tick so a failing socket cannot spin the thread.
                    error!("Receive failed: {}", e);
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return;
                }
            }
        }
    }

    fn handle_datagram(&mut self, len: usize, from: SocketAddr) -> NetResult<()> {
        read_packet(&self.recv_buf[..len], &mut self.header, &mut self.envelopes)?;
        let header = self.header;
        let mut envelopes = std::mem::take(&mut self.envelopes);
        let now = Instant::now();

        trace!(
            "Packet from {}: seq {} ack {} history {:#010x}, {} envelope(s)",
            from,
            header.send_sequence,
            header.acknowledge,
            header.ack_history,
            envelopes.len()
        );

        if !self.connections.contains_key(&from) {
            let requested = envelopes
                .iter()
                .any(|envelope| envelope.kind() == EnvelopeKind::ConnectRequest);
            if self.role != EndpointRole::Server || !requested {
                trace!("Ignoring packet from unknown address {}", from);
                self.envelopes = envelopes;
                return Ok(());
            }
            if !self.accept(from, now) {
                self.envelopes = envelopes;
                return Ok(());
            }
        }

        self.deliver(from, &header, &envelopes, now);
        envelopes.clear();
        self.envelopes = envelopes;
        Ok(())
    }

    /// Registers a connection for a new peer, or refuses it when full.
    fn accept(&mut self, from: SocketAddr, now: Instant) -> bool {
        let taken: BTreeSet<u8> = self.connections.values().map(Connection::peer_id).collect();
        let free = (0..self.config.max_peers)
            .filter_map(|id| u8::try_from(id).ok())
            .find(|id| !taken.contains(id));

        let Some(peer_id) = free else {
            self.refuse(from, now);
            return false;
        };

        // Connected once the peer acknowledges the accept.
        let mut conn = Connection::new(peer_id, from, ConnectionState::Connecting, now, &self.config);
        conn.queue_handshake(Envelope::control(true, EnvelopeKind::ConnectAccepted));
        debug!("Accepting {} as peer {}", from, peer_id);
        self.connections.insert(from, conn);
        true
    }

    fn refuse(&mut self, from: SocketAddr, now: Instant) {
        warn!(
            "Refusing {}: server full ({} peers)",
            from, self.config.max_peers
        );
        let mut conn = Connection::rejected(from, now, &self.config);
        conn.queue(Envelope::control(false, EnvelopeKind::ServerFull), None);
        match conn.write_next_packet(&mut self.writer, now) {
            Ok(Some(_)) => {
                if let Err(e) = self.transport.send_to(self.writer.as_slice(), from) {
                    error!("Send to {} failed: {}", from, e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Could not write server-full reply: {}", e),
        }
        self.shared.listeners.fire_server_full(&conn);
    }

    /// Runs acknowledgment bookkeeping and hands fresh envelopes out.
    fn deliver(
        &mut self,
        from: SocketAddr,
        header: &ProtocolHeader,
        envelopes: &[Envelope],
        now: Instant,
    ) {
        let Some(conn) = self.connections.get_mut(&from) else {
            return;
        };
        conn.process_acks(header, now);
        if self.role == EndpointRole::Server
            && conn.state() == ConnectionState::Connecting
            && conn.handshake_acknowledged()
        {
            conn.set_state(ConnectionState::Connected, now);
            info!("Peer {} connected from {}", conn.peer_id(), from);
            self.shared.peers.write().insert(conn.peer_id());
            self.shared.listeners.fire_connected(conn);
        }

        // Reliable payloads that cannot be handed out yet stay unacknowledged,
        // so the peer sends them again.
        let accepting = self.role == EndpointRole::Client
            && conn.state() == ConnectionState::Connecting
            && envelopes
                .iter()
                .any(|envelope| envelope.kind() == EnvelopeKind::ConnectAccepted);
        let held_back = !conn.is_connected()
            && !accepting
            && envelopes
                .iter()
                .any(|envelope| envelope.is_reliable() && envelope.kind() == EnvelopeKind::Payload);
        if held_back {
            trace!(
                "Holding back packet {} from {} in state {:?}",
                header.send_sequence,
                from,
                conn.state()
            );
            return;
        }

        let carries_reliable = envelopes.iter().any(Envelope::is_reliable);
        if !conn.record(header.send_sequence, carries_reliable) {
            trace!(
                "Dropping stale packet {} from {}",
                header.send_sequence, from
            );
            return;
        }

        for envelope in envelopes {
            match envelope.kind() {
                EnvelopeKind::Payload => {
                    if !conn.is_connected() {
                        trace!("Dropping payload from {} in state {:?}", from, conn.state());
                        continue;
                    }
                    match read_message(&self.factory, envelope) {
                        Ok(message) => self.shared.listeners.fire_received(conn, &message),
                        Err(e) => debug!("Undecodable payload from {}: {}", from, e),
                    }
                }
                EnvelopeKind::ConnectRequest | EnvelopeKind::Heartbeat => {}
                EnvelopeKind::ConnectAccepted => {
                    if self.role == EndpointRole::Client
                        && conn.state() == ConnectionState::Connecting
                    {
                        conn.assign_peer_id(header.peer_id);
                        conn.set_state(ConnectionState::Connected, now);
                        info!("Connected to {} as peer {}", from, header.peer_id);
                        self.shared.peers.write().insert(header.peer_id);
                        self.shared.listeners.fire_connected(conn);
                    }
                }
                EnvelopeKind::ServerFull => {
                    if self.role == EndpointRole::Client
                        && conn.state() == ConnectionState::Connecting
                    {
                        warn!("Server {} is full", from);
                        self.shared.listeners.fire_server_full(conn);
                        conn.set_state(ConnectionState::Disconnected, now);
                    }
                }
                EnvelopeKind::Disconnect => {
                    info!("Peer {} at {} disconnected", conn.peer_id(), from);
                    self.shared.peers.write().remove(&conn.peer_id());
                    conn.set_state(ConnectionState::Disconnected, now);
                }
            }
        }
    }

    fn drain_commands(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Connect(addr) => self.open(addr, now),
                Command::Disconnect(peer_id) => {
                    let shared = &self.shared;
                    for conn in self.connections.values_mut() {
                        if conn.peer_id() == peer_id {
                            begin_disconnect(conn, shared, now);
                        }
                    }
                }
                Command::DisconnectAll => {
                    for conn in self.connections.values_mut() {
                        begin_disconnect(conn, &self.shared, now);
                    }
                }
                Command::Send {
                    target,
                    envelope,
                    ticket,
                } => self.dispatch(target, &envelope, ticket),
            }
        }
    }

    fn open(&mut self, addr: SocketAddr, now: Instant) {
        if self.connections.contains_key(&addr) {
            debug!("Already connected or connecting to {}", addr);
            return;
        }
        info!("Connecting to {}", addr);
        let mut conn = Connection::new(
            INVALID_PEER_ID,
            addr,
            ConnectionState::Connecting,
            now,
            &self.config,
        );
        conn.queue(Envelope::control(true, EnvelopeKind::ConnectRequest), None);
        self.connections.insert(addr, conn);
    }

    fn dispatch(&mut self, target: Target, envelope: &Envelope, ticket: DeliveryTicket) {
        let mut targets: Vec<&mut Connection> = self
            .connections
            .values_mut()
            .filter(|conn| conn.is_connected())
            .filter(|conn| match target {
                Target::Connected => true,
                Target::Peer(peer_id) => conn.peer_id() == peer_id,
            })
            .collect();

        if targets.is_empty() {
            debug!("No connected target for {:?}, delivery failed", target);
        }
        let tickets = ticket.split(targets.len());
        for (conn, ticket) in targets.iter_mut().zip(tickets) {
            conn.queue(envelope.clone(), Some(ticket));
        }
    }

    fn update_connections(&mut self, now: Instant) {
        let config = &self.config;
        let shared = &self.shared;
        for conn in self.connections.values_mut() {
            if !conn.requeue_expired(now, config.max_resend_attempts) {
                begin_disconnect(conn, shared, now);
                continue;
            }
            match conn.state() {
                ConnectionState::Connecting => {
                    if conn.state_elapsed(now) >= config.handshake_timeout() {
                        warn!("Handshake with {} timed out", conn.addr());
                        conn.set_state(ConnectionState::Disconnected, now);
                    }
                }
                ConnectionState::Connected => {
                    if conn.idle_for(now) >= config.inactivity_timeout() {
                        warn!(
                            "Peer {} at {} timed out after {:?} of silence",
                            conn.peer_id(),
                            conn.addr(),
                            conn.idle_for(now)
                        );
                        begin_disconnect(conn, shared, now);
                    } else if !conn.has_outbound()
                        && conn.silent_for(now) >= config.heartbeat_interval()
                    {
                        conn.queue(Envelope::control(false, EnvelopeKind::Heartbeat), None);
                    }
                }
                ConnectionState::Disconnecting => {
                    if conn.state_elapsed(now) >= config.disconnect_linger() {
                        conn.set_state(ConnectionState::Disconnected, now);
                    }
                }
                ConnectionState::Disconnected => {}
            }
        }
    }

    /// Writes every due packet to the transport.
    fn flush(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            if conn.state() == ConnectionState::Disconnected {
                continue;
            }
            loop {
                let tickets = match conn.write_next_packet(&mut self.writer, now) {
                    Ok(Some(tickets)) => tickets,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Could not write packet for {}: {}", conn.addr(), e);
                        break;
                    }
                };
                match self.transport.send_to(self.writer.as_slice(), conn.addr()) {
                    Ok(_) => {
                        trace!("Sent {} bytes to {}", self.writer.len(), conn.addr());
                        for ticket in tickets {
                            ticket.settle();
                        }
                    }
                    Err(e) => {
                        error!("Send to {} failed: {}", conn.addr(), e);
                        break;
                    }
                }
            }
        }
    }

    fn remove_closed(&mut self) {
        let closed: Vec<SocketAddr> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.state() == ConnectionState::Disconnected)
            .map(|(&addr, _)| addr)
            .collect();
        for addr in closed {
            if let Some(conn) = self.connections.remove(&addr) {
                self.finalize(conn);
            }
        }
    }

    fn finalize(&self, mut conn: Connection) {
        conn.abandon();
        if conn.was_connected() {
            self.shared.peers.write().remove(&conn.peer_id());
            self.shared.listeners.fire_disconnected(&conn);
        }
    }

    /// Sends a last disconnect notice to every peer and finalizes them all.
    fn close_all(&mut self) {
        let now = Instant::now();
        for conn in self.connections.values_mut() {
            if conn.is_connected() {
                begin_disconnect(conn, &self.shared, now);
            }
        }
        self.flush(now);
        // Commands queued after the last tick never reach a peer.
        while let Ok(command) = self.commands.try_recv() {
            drop(command);
        }
        let connections: Vec<Connection> = self.connections.drain().map(|(_, conn)| conn).collect();
        for conn in connections {
            self.finalize(conn);
        }
    }
}

/// Fails outstanding sends, queues a disconnect notice and starts lingering.
fn begin_disconnect<M>(conn: &mut Connection, shared: &Shared<M>, now: Instant) {
    match conn.state() {
        ConnectionState::Connected => {
            info!("Disconnecting peer {} at {}", conn.peer_id(), conn.addr());
            shared.peers.write().remove(&conn.peer_id());
            conn.abandon();
            conn.queue(Envelope::control(false, EnvelopeKind::Disconnect), None);
            conn.set_state(ConnectionState::Disconnecting, now);
        }
        ConnectionState::Connecting => {
            conn.abandon();
            conn.queue(Envelope::control(false, EnvelopeKind::Disconnect), None);
            conn.set_state(ConnectionState::Disconnecting, now);
        }
        ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
    }
}
