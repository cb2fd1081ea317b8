//! Frame codec throughput benchmark.
//!
//! Measures Content-Length encode/decode and full message decode using
//! Criterion.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rpc_core::rpc::codec::{body_text, encode_frame, Frame, FrameCodec};
use rpc_core::rpc::message::decode_body;
use serde_json::json;
use tokio_util::codec::{Decoder, Encoder};

fn request_body(size: usize) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "textDocument/didChange",
        "params": {"text": "a".repeat(size)},
    }))
    .unwrap()
}

fn bench_encode(c: &mut Criterion) {
    let payload_sizes: &[usize] = &[0, 64, 1024, 4096, 65536];

    let mut group = c.benchmark_group("encode_frame");
    for &size in payload_sizes {
        let body = Bytes::from(request_body(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| {
                let mut dst = BytesMut::with_capacity(body.len() + 80);
                FrameCodec::default()
                    .encode(black_box(body.clone()), &mut dst)
                    .unwrap();
                dst
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let payload_sizes: &[usize] = &[0, 64, 1024, 4096, 65536];

    let mut group = c.benchmark_group("decode_frame");
    for &size in payload_sizes {
        let wire = encode_frame(&request_body(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| {
                let mut buf = BytesMut::from(black_box(&wire[..]));
                FrameCodec::default().decode(&mut buf).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let wire = encode_frame(&request_body(1024));

    c.bench_function("decode_message_1kb", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(black_box(&wire[..]));
            match FrameCodec::default().decode(&mut buf).unwrap() {
                Some(Frame::Message { body, charset }) => {
                    decode_body(body_text(&body, &charset).unwrap()).unwrap()
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_decode_message);
criterion_main!(benches);
