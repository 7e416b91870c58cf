use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docpipe_monitor::{ModelHealthRegistry, OperationTracker};
use std::collections::HashMap;

fn bench_record_request(c: &mut Criterion) {
    let registry = ModelHealthRegistry::new(50, 30.0);
    c.bench_function("record_request", |b| {
        b.iter(|| registry.record_request(black_box("phi-3-mini"), true, black_box(1.5)));
    });
}

fn bench_scoped_operation(c: &mut Criterion) {
    let tracker = OperationTracker::new(100, 50);
    c.bench_function("scoped_operation", |b| {
        b.iter(|| {
            let guard = tracker.track(black_box("pdf_extraction"), HashMap::new());
            drop(guard);
        });
    });
}

fn bench_performance_summary(c: &mut Criterion) {
    let tracker = OperationTracker::new(100, 50);
    for name in ["pdf_extraction", "chunking", "llm_generation"] {
        for _ in 0..50 {
            let guard = tracker.track(name, HashMap::new());
            drop(guard);
        }
    }
    c.bench_function("performance_summary", |b| {
        b.iter(|| black_box(tracker.performance_summary()));
    });
}

criterion_group!(
    benches,
    bench_record_request,
    bench_scoped_operation,
    bench_performance_summary
);
criterion_main!(benches);
