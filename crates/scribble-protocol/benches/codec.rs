//! Codec benchmarks for scribble-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use scribble_protocol::{codec, Frame, LineShape, Shape};

fn stroke(points: usize) -> Shape {
    Shape::Line(LineShape {
        id: "bench".to_string(),
        x: 0.0,
        y: 0.0,
        width: 100.0,
        height: 100.0,
        rotation: 0.0,
        points: (0..points * 2).map(|i| i as f64).collect(),
        stroke: "#000000".to_string(),
        stroke_width: 5.0,
        tension: 0.5,
        is_eraser: false,
    })
}

fn bench_encode_committed(c: &mut Criterion) {
    let frame = Frame::committed(stroke(64), 12);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("committed_64pt", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_committed(c: &mut Criterion) {
    let encoded = codec::encode(&Frame::committed(stroke(64), 12)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("committed_64pt", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let frame = Frame::Snapshot {
        shapes: (0..500).map(|_| stroke(32)).collect(),
        history_index: 500,
        drafts: Vec::new(),
    };

    c.bench_function("snapshot_500_shapes", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_committed,
    bench_decode_committed,
    bench_snapshot
);
criterion_main!(benches);
