use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use thinkbook::embeddings::chunking::{ChunkingConfig, chunk_document, chunk_text};

const VOCABULARY: &[&str] = &[
    "cell", "membrane", "nucleus", "protein", "energy", "mitochondria", "enzyme", "the", "of",
    "divides", "during", "mitosis", "and", "a", "structure", "which", "transports", "molecules",
];

fn document(words: usize) -> String {
    (0..words)
        .map(|i| VOCABULARY[(i * 7 + i / 3) % VOCABULARY.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let config = ChunkingConfig::default();

    let mut group = c.benchmark_group("chunk_text");
    for words in [1_000, 20_000, 200_000] {
        let text = document(words);
        group.bench_with_input(BenchmarkId::from_parameter(words), &text, |b, text| {
            b.iter(|| chunk_text(black_box(text), config.chunk_size, config.overlap));
        });
    }
    group.finish();

    let text = document(20_000);
    c.bench_function("chunk_document", |b| {
        b.iter(|| chunk_document(black_box(&text), black_box("textbook.pdf"), &config));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
