//! Benchmarks for splitting payloads into packets and reassembling them.

#![allow(clippy::unwrap_used, missing_docs)]

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tdslink_codec::{FIRST_PACKET_ID, PacketFramer};
use tdslink_protocol::PacketType;

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    for packet_size in [4096usize, 32767] {
        let framer = PacketFramer::new(packet_size).unwrap();
        let payload = vec![0x5Au8; 256 * 1024];
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_function(format!("encode_{packet_size}"), |b| {
            b.iter(|| black_box(framer.encode_to_bytes(PacketType::SqlBatch, &payload, FIRST_PACKET_ID)))
        });

        let framed = framer.encode_to_bytes(PacketType::TabularResult, &payload, FIRST_PACKET_ID).freeze();
        group.bench_function(format!("decode_{packet_size}"), |b| {
            b.iter(|| {
                let mut src = framed.clone();
                black_box(framer.decode(&mut src).unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_framing);
criterion_main!(benches);
