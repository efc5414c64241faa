//! Benchmarks for core retrieval-path primitives.
//! Run with: cargo bench -p cml-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cml_core::embeddings::cosine_similarity;
use cml_core::search::sanitize_fts5_query;

fn bench_sanitize_fts5(c: &mut Criterion) {
    c.bench_function("sanitize_fts5_query", |b| {
        b.iter(|| {
            black_box(sanitize_fts5_query("hello world \"exact phrase\" OR special-chars!@#"));
        })
    });
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..256).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..256).map(|i| (i as f32).cos()).collect();

    c.bench_function("cosine_similarity_256d", |b_bench| {
        b_bench.iter(|| {
            black_box(cosine_similarity(&a, &b));
        })
    });
}

fn bench_jaccard(c: &mut Criterion) {
    let a: Vec<String> = (0..20).map(|i| format!("topic-{i}")).collect();
    let b: Vec<String> = (10..30).map(|i| format!("topic-{i}")).collect();

    c.bench_function("jaccard_20x20_topics", |bench| {
        bench.iter(|| {
            black_box(cml_core::consolidation::jaccard(&a, &b));
        })
    });
}

fn bench_vector_store_search(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = cml_core::VectorStore::open(&dir.path().join("bench.sqlite"), 32).unwrap();

    for i in 0..200 {
        let vector: Vec<f32> = (0..32).map(|j| ((i * 32 + j) as f32).sin()).collect();
        let record = cml_core::VectorRecord {
            id: format!("e{i}"),
            event_id: format!("e{i}"),
            session_id: "bench".to_string(),
            event_type: "user_prompt".to_string(),
            content: "bench content".to_string(),
            vector,
            timestamp: chrono::Utc::now(),
            metadata: cml_core::MetaValue::empty_map(),
        };
        store.upsert(&record).unwrap();
    }

    let query: Vec<f32> = (0..32).map(|j| (j as f32).cos()).collect();
    c.bench_function("vector_store_search_200x32d_top10", |bench| {
        bench.iter(|| {
            black_box(store.search(&query, 10).unwrap());
        })
    });
}

criterion_group!(benches, bench_sanitize_fts5, bench_cosine_similarity, bench_jaccard, bench_vector_store_search);
criterion_main!(benches);
