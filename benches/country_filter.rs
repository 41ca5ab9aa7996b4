use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ddos_report_service::core::{filter_by_country, Visit};
use serde_json::json;

fn sample_visits(count: usize) -> Vec<Visit> {
    (0..count)
        .map(|i| {
            let country = match i % 3 {
                0 => json!(["US", "CA"]),
                1 => json!("DE"),
                _ => json!("fr"),
            };
            Visit::new(json!({"id": format!("v{}", i), "country": country}))
        })
        .collect()
}

fn country_filter_benchmark(c: &mut Criterion) {
    let visits = sample_visits(10_000);

    c.bench_function("filter_by_country_array_match", |b| {
        b.iter_batched(
            || visits.clone(),
            |visits| black_box(filter_by_country(visits, Some("ca"))),
            BatchSize::LargeInput,
        )
    });

    c.bench_function("filter_by_country_all", |b| {
        b.iter_batched(
            || visits.clone(),
            |visits| black_box(filter_by_country(visits, Some("all"))),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, country_filter_benchmark);
criterion_main!(benches);
