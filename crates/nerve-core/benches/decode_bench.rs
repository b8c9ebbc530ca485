use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nerve_core::spans::decode_spans;
use nerve_core::viterbi::ViterbiDecoder;
use nerve_core::vocab::Vocab;

fn bench_decode_spans(c: &mut Criterion) {
    let pattern = ["B-PER", "I-PER", "O", "B-LOC", "O", "I-ORG", "I-ORG", "B-MISC"];
    let tags: Vec<&str> = pattern.iter().copied().cycle().take(512).collect();

    c.bench_function("decode_spans_512", |b| {
        b.iter(|| decode_spans(black_box(&tags)));
    });
}

fn bench_viterbi(c: &mut Criterion) {
    let labels = ["O", "B-PER", "I-PER", "B-LOC", "I-LOC", "B-ORG", "I-ORG", "B-MISC", "I-MISC"];
    let vocab = Vocab::from_itos(labels.iter().map(|s| s.to_string()).collect());
    let n = vocab.len();

    let emissions: Vec<Vec<f32>> = (0..64)
        .map(|t| (0..n).map(|k| ((t * 7 + k * 3) % 11) as f32 / 11.0).collect())
        .collect();
    let transitions = vec![vec![0.1f32; n]; n];
    let start = vec![0.0f32; n];
    let end = vec![0.0f32; n];

    let free = ViterbiDecoder::new(n);
    let constrained = ViterbiDecoder::constrained(&vocab);

    c.bench_function("viterbi_64x9", |b| {
        b.iter(|| {
            free.decode(black_box(&emissions), &transitions, &start, &end)
                .unwrap()
        });
    });

    c.bench_function("viterbi_constrained_64x9", |b| {
        b.iter(|| {
            constrained
                .decode(black_box(&emissions), &transitions, &start, &end)
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_decode_spans, bench_viterbi);
criterion_main!(benches);
