use criterion::{Criterion, criterion_group, criterion_main};
use rag_memory::embeddings::{LOCAL_DIMENSION, LocalEmbedder};
use rag_memory::math::top_k;
use rag_memory::store::{NewEmbedding, SearchOptions, StoreSettings, VectorStore};
use std::hint::black_box;

fn corpus(size: usize) -> Vec<String> {
    (0..size)
        .map(|i| format!("memory {i} about topic {} and place {}", i % 17, i % 29))
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let embedder = LocalEmbedder::new();
    let texts = corpus(2_000);
    let vectors: Vec<Vec<f32>> = texts.iter().map(|t| embedder.embed_text(t)).collect();
    let query = embedder.embed_text("topic 3 and place 11");
    assert_eq!(query.len(), LOCAL_DIMENSION);

    c.bench_function("top_k_2000", |b| {
        b.iter(|| top_k(black_box(query.as_slice()), black_box(vectors.as_slice()), 10, 0.0));
    });

    let runtime = tokio::runtime::Runtime::new().expect("can build runtime");
    let store = runtime.block_on(async {
        let store = VectorStore::in_memory(StoreSettings::default())
            .await
            .expect("can open store");
        for (text, vector) in texts.iter().zip(&vectors).take(500) {
            store
                .add_embedding(NewEmbedding::new(text.as_str(), vector.clone()))
                .await
                .expect("can add embedding");
        }
        store
    });
    let options = SearchOptions::new(10, 0.0);
    c.bench_function("store_search_500", |b| {
        b.iter(|| runtime.block_on(store.search(black_box(&query), black_box(&options))));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
