use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use std::time::Duration;

use sessiongate::identity::{MemorySessionStore, Principal, SessionStore};

fn bench_sessions(c: &mut Criterion) {
    let ns = [1_000usize, 10_000usize];
    let mut group = c.benchmark_group("memory_session_store");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &ns {
        group.throughput(Throughput::Elements(n as u64));

        // Create n sessions from empty
        group.bench_with_input(BenchmarkId::new("create", n.to_string()), &n, |b, &n| {
            b.iter(|| {
                let store = MemorySessionStore::new(Duration::from_secs(600));
                for _ in 0..n { let _ = store.create(); }
                criterion::black_box(store.len());
            });
        });

        // Load every live id
        let store = MemorySessionStore::new(Duration::from_secs(600));
        let ids: Vec<String> = (0..n).filter_map(|_| store.create().ok()).map(|s| s.id).collect();
        group.bench_with_input(BenchmarkId::new("load", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let mut hits = 0usize;
                for id in &ids {
                    if let Ok(Some(_)) = store.load(id) { hits += 1; }
                }
                criterion::black_box(hits);
            });
        });

        // Login-shaped regenerate: principal set, id swapped
        group.bench_with_input(BenchmarkId::new("regenerate", n.to_string()), &n, |b, &n| {
            b.iter(|| {
                let store = MemorySessionStore::new(Duration::from_secs(600));
                for _ in 0..n {
                    let Ok(mut s) = store.create() else { continue; };
                    s.set_principal(&Principal::new("bench"));
                    let _ = store.regenerate(&s);
                }
                criterion::black_box(store.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sessions);
criterion_main!(benches);
