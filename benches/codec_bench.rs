use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use polyrpc::core::codec::Codec;
use polyrpc::core::reader::MessageReader;
use polyrpc::protocol::binary::{BinaryCodec, BinaryFrame};
use polyrpc::protocol::json::{JsonCodec, JsonFrame};
use std::sync::Arc;
use tokio_util::codec::Decoder;

#[allow(clippy::unwrap_used)]
fn bench_binary_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_codec");
    let body_sizes = [64usize, 512, 4096, 65536];

    for &size in &body_sizes {
        let frame = BinaryFrame::request(1, 7, vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            let mut buf = BytesMut::with_capacity(size + 64);
            b.iter(|| {
                buf.clear();
                BinaryCodec.encode(&frame, &mut buf).unwrap();
            })
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut buf = BytesMut::new();
            BinaryCodec.encode(&frame, &mut buf).unwrap();
            b.iter(|| {
                let decoded = BinaryCodec.decode(&buf);
                assert!(decoded.is_ok());
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_json_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_codec");
    let body_sizes = [64usize, 512, 4096];

    for &size in &body_sizes {
        let frame = JsonFrame::request(1, "Echo", "x".repeat(size)).with_trace_id("0000000000000abc");
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            let mut buf = BytesMut::with_capacity(size + 128);
            b.iter(|| {
                buf.clear();
                JsonCodec.encode(&frame, &mut buf).unwrap();
            })
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut buf = BytesMut::new();
            JsonCodec.encode(&frame, &mut buf).unwrap();
            b.iter(|| {
                let decoded = JsonCodec.decode(&buf);
                assert!(decoded.is_ok());
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_stream_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_framing");
    let frames = 64usize;

    let mut wire = BytesMut::new();
    for i in 0..frames {
        JsonCodec
            .encode(&JsonFrame::request(i as u64, "Echo", "payload"), &mut wire)
            .unwrap();
    }
    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function(format!("split_{frames}_frames"), |b| {
        b.iter_batched(
            || wire.clone(),
            |mut src| {
                let mut reader = MessageReader::<JsonFrame>::new(Arc::new(JsonCodec));
                let mut n = 0;
                while reader.decode(&mut src).unwrap().is_some() {
                    n += 1;
                }
                assert_eq!(n, frames);
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_binary_codec, bench_json_codec, bench_stream_framing);
criterion_main!(benches);
