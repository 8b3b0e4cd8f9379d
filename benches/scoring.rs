use criterion::{black_box, criterion_group, criterion_main, Criterion};
use streval::aggregate::ProjectAggregator;
use streval::score::{SimilarityScorer, Weights};

fn synthetic_function(name: &str, branches: usize, offset: usize) -> String {
    let mut text = format!(
        "FUNCTION_BLOCK {name}\nVAR_INPUT\n\tlevel : INT;\n\tlimit : INT := 100;\nEND_VAR\nVAR_OUTPUT\n\tvalve : BOOL;\nEND_VAR\n"
    );
    for i in 0..branches {
        text.push_str(&format!(
            "IF level > {} THEN\n\tvalve := TRUE;\n\tlimit := limit - {};\nELSIF level < {} THEN\n\tvalve := FALSE;\nEND_IF;\n",
            i * 10 + offset,
            i + 1,
            i * 5
        ));
    }
    text.push_str("FOR i := 0 TO limit DO\n\tlevel := level + i;\nEND_FOR;\nEND_FUNCTION_BLOCK\n");
    text
}

fn bench_score_case(c: &mut Criterion) {
    let scorer = SimilarityScorer::default();
    let weights = Weights::uniform();
    let reference = synthetic_function("Tank", 40, 0);
    let candidate = synthetic_function("Tank", 36, 3);

    c.bench_function("score_case_40_branches", |b| {
        b.iter(|| {
            let score = scorer.score("Tank", black_box(&candidate), black_box(&reference), &weights);
            black_box(score.composite);
        });
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let scorer = SimilarityScorer::default();
    let weights = Weights::uniform();
    let reference = synthetic_function("Tank", 4, 0);
    let cases: Vec<_> = (0..2_000)
        .map(|i| {
            let candidate = synthetic_function("Tank", 4, i % 7);
            scorer.score(&format!("F{i}"), &candidate, &reference, &weights)
        })
        .collect();
    let aggregator = ProjectAggregator::new(weights, 1e-3);

    c.bench_function("aggregate_2000_cases", |b| {
        b.iter(|| {
            let summary = aggregator.aggregate("bench", black_box(&cases));
            black_box(summary.successful_count);
        });
    });
}

criterion_group!(scoring, bench_score_case, bench_aggregate);
criterion_main!(scoring);
