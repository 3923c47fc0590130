//! Performance benchmarks for the packet codec and the framer.
//!
//! At 19200 baud the link carries under 250 packets per second, so these
//! numbers only need to show the receive path is never the bottleneck.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use medcab_core::DeviceAddress;
use medcab_protocol::{Framer, Packet, PacketCodec, build_unlock, parse_response};
use std::hint::black_box;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};

fn status_response() -> Vec<u8> {
    Packet::new(0x00, 0x00, 0x80, 0x10, vec![0b1010_0101, 0x0F])
        .unwrap()
        .to_bytes()
        .to_vec()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("build_unlock", |b| {
        b.iter(|| {
            let packet = build_unlock(DeviceAddress::default(), black_box(7)).unwrap();
            black_box(packet.to_bytes());
        });
    });

    let packet = build_unlock(DeviceAddress::default(), 7).unwrap();
    group.bench_function("codec_encode", |b| {
        b.iter(|| {
            let mut codec = PacketCodec::new();
            let mut buffer = BytesMut::new();
            codec.encode(black_box(packet.clone()), &mut buffer).unwrap();
            black_box(buffer);
        });
    });

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    let bytes = status_response();
    group.bench_function("parse_status_response", |b| {
        b.iter(|| black_box(parse_response(black_box(&bytes)).unwrap()));
    });

    group.finish();
}

/// Framer throughput for a burst of status responses cut into chunks of
/// varying size.
fn bench_framer_chunks(c: &mut Criterion) {
    let mut group = c.benchmark_group("framer");

    let packet = status_response();
    let stream: Vec<u8> = packet.iter().copied().cycle().take(packet.len() * 100).collect();
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [1usize, 4, 16, 64] {
        group.bench_with_input(
            BenchmarkId::new("feed", chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut framer = Framer::new();
                    let now = Instant::now();
                    let mut delivered = 0;
                    for chunk in stream.chunks(chunk_size) {
                        delivered += framer.feed(chunk, now).len();
                    }
                    assert_eq!(delivered, 100);
                    black_box(delivered);
                });
            },
        );
    }

    group.finish();
}

fn bench_codec_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");
    group.throughput(Throughput::Elements(10));

    let packet = status_response();
    let stream: Vec<u8> = packet.iter().copied().cycle().take(packet.len() * 10).collect();

    group.bench_function("decode_ten_packets", |b| {
        b.iter(|| {
            let mut codec = PacketCodec::new();
            let mut buffer = BytesMut::from(&stream[..]);
            let mut count = 0;
            while let Some(packet) = codec.decode(&mut buffer).unwrap() {
                black_box(packet);
                count += 1;
            }
            assert_eq!(count, 10);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_parse,
    bench_framer_chunks,
    bench_codec_decode
);
criterion_main!(benches);
