//! Decode throughput for typical MCP frames.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use crosstalk_core::jsonrpc::Envelope;

fn bench_decode(c: &mut Criterion) {
    let request =
        br#"{"jsonrpc":"2.0","id":42,"method":"tools/call","params":{"name":"search","arguments":{"query":"rust async runtime","limit":10}}}"#;
    let notification =
        br#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":"p1","progress":0.5,"total":1.0}}"#;
    let response = br#"{"jsonrpc":"2.0","id":42,"result":{"content":[{"type":"text","text":"ok"}]}}"#;

    c.bench_function("decode_request", |b| {
        b.iter(|| Envelope::decode(black_box(request)).unwrap());
    });
    c.bench_function("decode_notification", |b| {
        b.iter(|| Envelope::decode(black_box(notification)).unwrap());
    });
    c.bench_function("decode_response", |b| {
        b.iter(|| Envelope::decode(black_box(response)).unwrap());
    });

    let large = {
        let payload = "x".repeat(64 * 1024);
        format!(r#"{{"jsonrpc":"2.0","id":1,"result":{{"data":"{payload}"}}}}"#).into_bytes()
    };
    c.bench_function("decode_64k_response", |b| {
        b.iter(|| Envelope::decode(black_box(&large)).unwrap());
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
