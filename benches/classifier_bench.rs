//! Benchmark for failure-message classification

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use agora::classify::classify;

const MESSAGES: &[(&str, &str)] = &[
    ("allowance", "ERC20: insufficient allowance"),
    ("balance", "ERC20: transfer amount exceeds balance"),
    ("duplicate", "execution reverted: identifier already in use"),
    ("paused", "Pausable: paused"),
    ("rejected", "user rejected the signature request"),
    ("unknown", "something nobody has seen before"),
];

fn bench_classify_known_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for (label, message) in MESSAGES {
        group.bench_with_input(BenchmarkId::new("message", label), message, |b, message| {
            b.iter(|| black_box(classify(black_box(message))));
        });
    }

    group.finish();
}

fn bench_classify_long_haystack(c: &mut Criterion) {
    // Node errors often wrap the reason in a page of JSON-RPC context.
    let padded = format!(
        "rpc error {{ code: 3, data: {} }}: execution reverted: ERC20: insufficient allowance",
        "x".repeat(4_096)
    );

    c.bench_function("classify_padded_message", |b| {
        b.iter(|| black_box(classify(black_box(&padded))));
    });
}

criterion_group!(benches, bench_classify_known_messages, bench_classify_long_haystack);
criterion_main!(benches);
