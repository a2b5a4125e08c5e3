//! Benchmark for packet encoding and decoding.
//!
//! Run with: cargo bench --package harenet --bench protocol_benchmark

use std::sync::Arc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use harenet::connection::ReceiveWindow;
use harenet::protocol::{read_packet, write_packet, MAX_DATAGRAM_SIZE};
use harenet::{Envelope, EnvelopeKind, PacketReader, PacketWriter, ProtocolHeader};

fn sample_header() -> ProtocolHeader {
    let mut header = ProtocolHeader::new();
    header.make_valid();
    header.peer_id = 3;
    header.send_sequence = 1_000;
    header.acknowledge = 998;
    header.ack_history = 0xFFFF_FFFE;
    header
}

/// Twenty 48-byte payloads, half reliable: a busy tick's worth.
fn sample_envelopes() -> Vec<Envelope> {
    (0..20u8)
        .map(|i| {
            let payload: Arc<[u8]> = Arc::from(vec![i; 48]);
            Envelope::new(i % 2 == 0, EnvelopeKind::Payload, payload)
        })
        .collect()
}

fn benchmark_header(c: &mut Criterion) {
    let header = sample_header();
    let mut writer = PacketWriter::new(MAX_DATAGRAM_SIZE);

    c.bench_function("header_write", |b| {
        b.iter(|| {
            writer.reset();
            black_box(&header).write_to(&mut writer).unwrap();
            black_box(writer.len())
        });
    });

    writer.reset();
    header.write_to(&mut writer).unwrap();
    let bytes = writer.as_slice().to_vec();
    let mut parsed = ProtocolHeader::new();

    c.bench_function("header_read", |b| {
        b.iter(|| {
            let mut reader = PacketReader::new(black_box(&bytes));
            parsed.read_from(&mut reader).unwrap();
            black_box(parsed.acknowledge)
        });
    });
}

fn benchmark_packet(c: &mut Criterion) {
    let envelopes = sample_envelopes();
    let mut header = sample_header();
    let mut writer = PacketWriter::new(1200);

    c.bench_function("packet_write_20_envelopes", |b| {
        b.iter(|| {
            write_packet(&mut writer, &mut header, black_box(&envelopes).iter()).unwrap();
            black_box(writer.len())
        });
    });

    write_packet(&mut writer, &mut header, envelopes.iter()).unwrap();
    let bytes = writer.as_slice().to_vec();
    let mut parsed = ProtocolHeader::new();
    let mut received = Vec::with_capacity(32);

    c.bench_function("packet_read_20_envelopes", |b| {
        b.iter(|| {
            read_packet(black_box(&bytes), &mut parsed, &mut received).unwrap();
            black_box(received.len())
        });
    });
}

fn benchmark_receive_window(c: &mut Criterion) {
    c.bench_function("receive_window_1000_in_order", |b| {
        b.iter(|| {
            let mut window = ReceiveWindow::new();
            for sequence in 1..=1000u32 {
                black_box(window.record(sequence));
            }
            black_box(window.ack_history())
        });
    });

    c.bench_function("receive_window_1000_reordered", |b| {
        b.iter(|| {
            let mut window = ReceiveWindow::new();
            for pair in (1..=1000u32).step_by(2) {
                black_box(window.record(pair + 1));
                black_box(window.record(pair));
            }
            black_box(window.ack_history())
        });
    });
}

criterion_group!(
    benches,
    benchmark_header,
    benchmark_packet,
    benchmark_receive_window
);
criterion_main!(benches);
