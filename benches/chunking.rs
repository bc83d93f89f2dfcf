use criterion::{Criterion, criterion_group, criterion_main};
use rag_memory::embeddings::{ChunkingConfig, LocalEmbedder, chunk_text};
use std::hint::black_box;

const SENTENCE: &str = "Semantic memory keeps long conversations searchable on the device. ";

fn document() -> String {
    (0..40)
        .map(|_| SENTENCE.repeat(6))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let content = document();
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_text(black_box(&content), black_box(&config)));
    });

    let embedder = LocalEmbedder::new();
    let chunks = chunk_text(&content, &config);
    c.bench_function("local_embedding", |b| {
        b.iter(|| {
            for chunk in &chunks {
                black_box(embedder.embed_text(black_box(&chunk.text)));
            }
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
