use criterion::{black_box, criterion_group, criterion_main, Criterion};
use agentic_rag::retrieval::sparse::SparseIndex;
use agentic_rag::retrieval::{rrf_fuse, Chunker};

fn chunker_benchmark(c: &mut Criterion) {
    let chunker = Chunker::default();
    let text = "Hybrid retrieval splits documents into sentence-aligned chunks. \
        Each chunk is indexed twice.\n\n"
        .repeat(200);

    c.bench_function("chunker_split_long_text", |b| {
        b.iter(|| {
            let chunks = chunker.chunk("bench", black_box(text.as_str()));
            black_box(chunks.len());
        });
    });
}

fn bm25_benchmark(c: &mut Criterion) {
    let mut index = SparseIndex::new();
    for i in 0..2_000 {
        let text = format!(
            "Document {i} covers quarterly revenue, hiring plans and product {} launches.",
            i % 37
        );
        index.insert(&format!("doc{i}#0"), &text);
    }

    c.bench_function("bm25_search_2000_chunks", |b| {
        b.iter(|| {
            let hits = index.search(black_box("quarterly revenue product 12"), 20, |_| true);
            black_box(hits.len());
        });
    });
}

fn fusion_benchmark(c: &mut Criterion) {
    let sparse: Vec<String> = (0..100).map(|i| format!("c{i}")).collect();
    let dense: Vec<String> = (0..100).rev().map(|i| format!("c{}", i * 2)).collect();

    c.bench_function("rrf_fuse_two_lists_of_100", |b| {
        b.iter(|| {
            let fused = rrf_fuse(black_box(&sparse), black_box(&dense));
            black_box(fused.len());
        });
    });
}

criterion_group!(benches, chunker_benchmark, bm25_benchmark, fusion_benchmark);
criterion_main!(benches);
