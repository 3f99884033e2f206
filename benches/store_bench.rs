//! Vector memory search: pivot-window candidates vs exhaustive scan.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pawz_presence::atoms::memory_types::{MemoryKind, NewMemory, SearchQuery};
use pawz_presence::atoms::types::MemoryStoreConfig;
use pawz_presence::engine::memory::{HashingEmbedder, InMemoryKvStore, VectorMemoryStore};
use std::sync::Arc;
use tokio::runtime::Runtime;

const TOPICS: [&str; 8] = [
    "coffee in the morning before work",
    "stressful deadline at the office",
    "weekend hike with friends",
    "learning to play the guitar",
    "worried about an exam next week",
    "cooking pasta for the family",
    "moving to a new apartment",
    "training for a half marathon",
];

fn build_store(rt: &Runtime, size: usize, exact_scan_below: usize) -> VectorMemoryStore {
    let config = MemoryStoreConfig { capacity: size, exact_scan_below, ..Default::default() };
    let store = VectorMemoryStore::open(Arc::new(HashingEmbedder::new(128)), Arc::new(InMemoryKvStore::new()), config);
    rt.block_on(async {
        for i in 0..size {
            let content = format!("{} (note {})", TOPICS[i % TOPICS.len()], i);
            store
                .insert(NewMemory::new(content, MemoryKind::Conversation, (i % 10) as f32 / 10.0))
                .await
                .expect("insert");
        }
    });
    store
}

fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("memory_search");
    group.sample_size(30);

    for &size in &[500usize, 2_000] {
        let exact = build_store(&rt, size, usize::MAX);
        let pivot = build_store(&rt, size, 0);
        let query = SearchQuery::new("stress before a deadline", 10, 0.1);
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("exact", size), &exact, |b, store| {
            b.iter(|| rt.block_on(async { black_box(store.search(&query).await.expect("search")) }))
        });
        group.bench_with_input(BenchmarkId::new("pivot", size), &pivot, |b, store| {
            b.iter(|| rt.block_on(async { black_box(store.search(&query).await.expect("search")) }))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
