//! Criterion benchmarks for the Reloader frame codec.
//!
//! Measures framing and unframing cost across payload sizes typical of
//! markup files (a few hundred bytes up to a large page of XAML).
//!
//! Run with:
//! ```bash
//! cargo bench --package reloader-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reloader_core::protocol::codec::{decode_frame, decode_header, encode_frame, HEADER_SIZE};
use reloader_core::{is_keepalive, KEEPALIVE_MESSAGE};

// ── Payload fixtures ──────────────────────────────────────────────────────────

const PAYLOAD_SIZES: &[usize] = &[64, 1024, 16 * 1024, 256 * 1024];

fn make_markup(size: usize) -> Vec<u8> {
    let line = b"<Grid><TextBlock Text=\"Hello\" Margin=\"4\" /></Grid>\n";
    line.iter().copied().cycle().take(size).collect()
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `encode_frame` for each payload size.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for &size in PAYLOAD_SIZES {
        let payload = make_markup(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &payload, |b, payload| {
            b.iter(|| encode_frame(black_box(payload)).expect("encode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks `decode_frame` over pre-encoded frames.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame");
    for &size in PAYLOAD_SIZES {
        let frame = encode_frame(&make_markup(size)).expect("encode must succeed for setup");
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &frame, |b, frame| {
            b.iter(|| decode_frame(black_box(frame)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks the client's per-frame hot path: header check plus keep-alive filter.
fn bench_keepalive_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("keepalive_path");

    let ping = encode_frame(KEEPALIVE_MESSAGE.as_bytes()).expect("encode must succeed");
    group.bench_function("header_and_filter", |b| {
        b.iter(|| {
            let header = [ping[0], ping[1], ping[2], ping[3]];
            let len = decode_header(black_box(header)).expect("valid header");
            is_keepalive(black_box(&ping[HEADER_SIZE..HEADER_SIZE + len]))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_keepalive_path);
criterion_main!(benches);
