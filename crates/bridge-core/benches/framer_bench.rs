//! Criterion benchmarks for the packet framer.
//!
//! A 4800 baud NMEA line delivers roughly 480 bytes per second, so the
//! framer only needs to be far faster than the serial link; these numbers
//! are mainly a regression guard for the per-byte loop.
//!
//! Run with:
//! ```bash
//! cargo bench --package bridge-core --bench framer_bench
//! ```

use std::sync::{Arc, Mutex};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use bridge_core::{FramerConfig, Packet, PacketFramer, PacketSink, WireFormat};

struct Discard;

#[derive(Clone, Default)]
struct Last(Arc<Mutex<Option<Packet>>>);

impl PacketSink for Last {
    fn packet_ready(&self, packet: Packet) {
        *self.0.lock().unwrap() = Some(packet);
    }
}

impl PacketSink for Discard {
    fn packet_ready(&self, packet: Packet) {
        black_box(packet);
    }
}

fn nmea_chunk() -> Vec<u8> {
    let sentence = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    sentence.iter().cycle().take(256).copied().collect()
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    let inputs = [("nmea", nmea_chunk()), ("no_delimiter", vec![b'x'; 256])];
    for (label, chunk) in inputs.iter() {
        group.throughput(Throughput::Bytes(chunk.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), chunk, |b, chunk| {
            let framer = PacketFramer::new("bench", FramerConfig::default(), Box::new(Discard))
                .expect("valid config");
            b.iter(|| framer.ingest(black_box(chunk)).expect("chunk fits"));
        });
    }

    group.finish();
}

fn bench_to_wire(c: &mut Criterion) {
    let last = Last::default();
    let framer = PacketFramer::new("bench", FramerConfig::default(), Box::new(last.clone()))
        .expect("valid config");
    framer
        .ingest(b"$GPRMC,123519,A,4807.038,N,01131.000,E*6A\n")
        .expect("chunk fits");
    let packet = last.0.lock().unwrap().take().expect("one packet");

    c.bench_function("to_wire/nul_terminated", |b| {
        b.iter(|| black_box(&packet).to_wire(WireFormat::NulTerminated))
    });
    c.bench_function("to_wire/length_prefixed", |b| {
        b.iter(|| black_box(&packet).to_wire(WireFormat::LengthPrefixed))
    });
}

criterion_group!(benches, bench_ingest, bench_to_wire);
criterion_main!(benches);
