//! Frame decoding benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{Command, PeerFrame, Phase, RequestId};

fn bench_decode_payload(c: &mut Criterion) {
    let text = format!(r#"{{"chat":"{}","out":2}}"#, "x".repeat(256));

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("payload_256B", |b| {
        b.iter(|| PeerFrame::decode(black_box(&text), Phase::Joined))
    });
    group.finish();
}

fn bench_decode_callback(c: &mut Criterion) {
    let text = r#"{"callback":{"get":"k3j9x0a1b","result":{"muted":true,"volume":80}}}"#;

    c.bench_function("decode_callback", |b| {
        b.iter(|| PeerFrame::decode(black_box(text), Phase::Joined))
    });
}

fn bench_seal_envelope(c: &mut Criterion) {
    let id = RequestId::generate();

    c.bench_function("seal_envelope", |b| {
        b.iter(|| {
            Command::action("mic", Some("guest".into()), Some("toggle".into()))
                .into_envelope(black_box(&id))
                .to_text()
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_decode_payload,
    bench_decode_callback,
    bench_seal_envelope
);
criterion_main!(benches);
