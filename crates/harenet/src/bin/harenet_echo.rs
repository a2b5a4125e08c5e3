//! # harenet echo
//!
//! Echo server and client for manual testing over a real network.
//!
//! ## Usage
//!
//! ```bash
//! harenet_echo server --bind 0.0.0.0:7777
//! harenet_echo client --connect 127.0.0.1:7777 --count 20 --config harenet.toml
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam_channel::{unbounded, Sender};
use harenet::{
    Connection, ConnectionListener, DeliveryStatus, Endpoint, NetConfig, NetResult, RawMessage,
    RawMessageFactory, FLAG_RELIABLE,
};
use tracing::{info, warn};

/// Events forwarded from the network thread to `main`.
enum Event {
    Connected(u8),
    Disconnected(u8),
    Received(u8, RawMessage),
    ServerFull,
}

struct Forwarder {
    events: Sender<Event>,
}

impl ConnectionListener<RawMessage> for Forwarder {
    fn on_connected(&self, connection: &Connection) {
        let _ = self.events.send(Event::Connected(connection.peer_id()));
    }

    fn on_disconnected(&self, connection: &Connection) {
        let _ = self.events.send(Event::Disconnected(connection.peer_id()));
    }

    fn on_received(&self, connection: &Connection, message: &RawMessage) {
        let _ = self
            .events
            .send(Event::Received(connection.peer_id(), message.clone()));
    }

    fn on_server_full(&self, _connection: &Connection) {
        let _ = self.events.send(Event::ServerFull);
    }
}

struct Options {
    mode: String,
    bind: String,
    connect: String,
    count: u32,
    config: Option<String>,
}

fn parse_args() -> Option<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        mode: args.get(1).cloned()?,
        bind: "0.0.0.0:7777".to_string(),
        connect: "127.0.0.1:7777".to_string(),
        count: 10,
        config: None,
    };

    let mut i = 2;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--bind" | "-b", Some(value)) => options.bind = value,
            ("--connect" | "-c", Some(value)) => options.connect = value,
            ("--count" | "-n", Some(value)) => options.count = value.parse().unwrap_or(10),
            ("--config", Some(value)) => options.config = Some(value),
            _ => return None,
        }
        i += 2;
    }
    Some(options)
}

fn print_usage() {
    println!("Usage: harenet_echo <server|client> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -b, --bind <ADDR>       Server bind address (default: 0.0.0.0:7777)");
    println!("  -c, --connect <ADDR>    Client target address (default: 127.0.0.1:7777)");
    println!("  -n, --count <NUM>       Messages the client sends (default: 10)");
    println!("      --config <PATH>     TOML configuration file");
}

fn run_server(config: NetConfig, bind: &str) -> NetResult<()> {
    let server = Endpoint::server(config, RawMessageFactory, bind)?;
    let (events, inbox) = unbounded();
    server.add_connection_listener(Arc::new(Forwarder { events }));
    server.start()?;
    info!("Echo server listening on {:?}", server.local_addr());

    for event in inbox {
        match event {
            Event::Connected(peer) => info!("Peer {} connected", peer),
            Event::Disconnected(peer) => info!("Peer {} disconnected", peer),
            Event::Received(peer, message) => {
                if let Err(e) = server.send_to(FLAG_RELIABLE, &message, peer) {
                    warn!("Echo to peer {} failed: {}", peer, e);
                }
            }
            Event::ServerFull => {}
        }
    }
    Ok(())
}

fn run_client(config: NetConfig, target: &str, count: u32) -> NetResult<()> {
    let client = Endpoint::client(config, RawMessageFactory)?;
    let (events, inbox) = unbounded();
    client.add_connection_listener(Arc::new(Forwarder { events }));
    client.start()?;
    client.connect(target)?;

    match inbox.recv_timeout(client.config().handshake_timeout()) {
        Ok(Event::Connected(peer)) => info!("Connected to {} as peer {}", target, peer),
        Ok(Event::ServerFull) => {
            warn!("Server {} is full", target);
            return Ok(());
        }
        _ => {
            warn!("No answer from {}", target);
            return Ok(());
        }
    }

    let start = Instant::now();
    let mut handles = Vec::with_capacity(count as usize);
    for i in 0..count {
        handles.push(client.send(FLAG_RELIABLE, format!("echo #{i}").as_str())?);
    }

    let mut echoed = 0;
    while echoed < count {
        match inbox.recv_timeout(Duration::from_secs(5)) {
            Ok(Event::Received(_, message)) => {
                echoed += 1;
                info!("{}", String::from_utf8_lossy(message.as_bytes()));
            }
            Ok(Event::Disconnected(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    let delivered = handles
        .iter()
        .filter(|handle| handle.wait_timeout(Duration::from_secs(1)) == DeliveryStatus::Delivered)
        .count();
    println!(
        "Sent {}, delivered {}, echoed {} in {:?}",
        count,
        delivered,
        echoed,
        start.elapsed()
    );

    client.disconnect_all()?;
    client.stop();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt().init();

    let Some(options) = parse_args() else {
        print_usage();
        return;
    };

    let config = match options.config.as_deref().map(NetConfig::load) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
        None => NetConfig::default(),
    };

    let result = match options.mode.as_str() {
        "server" => run_server(config, &options.bind),
        "client" => run_client(config, &options.connect, options.count),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("harenet_echo: {e}");
        std::process::exit(1);
    }
}
