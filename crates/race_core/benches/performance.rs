//! Performance benchmarks for race_core using Criterion.rs.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use race_core::config::StoreConfig;
use race_core::fallback::FallbackEstimator;
use race_core::itinerary::LegMode;
use race_core::progress::overall_progress;
use race_core::state::{bot_state_key, BotState};
use race_core::store::StateStore;
use race_core::test_helpers::{place, sample_itinerary, test_start, transit_leg};
use race_core::transit::catalog::StationCatalog;
use race_core::transit::direction::DirectionResolver;

fn bench_direction_resolution(c: &mut Criterion) {
    let names: Vec<String> = (0..43).map(|i| format!("역{i:02}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let catalog = StationCatalog::new()
        .with_line("1002", &refs, 201)
        .with_line("1004", &refs, 409);
    let resolver = DirectionResolver::new(Arc::new(catalog));

    let mut group = c.benchmark_group("direction_resolution");
    for (label, line, start) in [("linear", "1004", 10), ("loop_seam", "1002", 40)] {
        let run: Vec<String> = (0..6).map(|i| names[(start + i) % names.len()].clone()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(label), &run, |b, run| {
            b.iter(|| black_box(resolver.resolve(black_box(run), line)));
        });
    }
    group.finish();
}

fn bench_progress(c: &mut Criterion) {
    let mut legs = sample_itinerary();
    for i in 0..20 {
        legs.push(transit_leg(
            LegMode::Rail,
            "수도권2호선",
            place("출발", 127.0, 37.5),
            place("도착", 127.01 + i as f64 * 0.001, 37.5),
            180,
            &["출발", "중간", "도착"],
        ));
    }
    let fallback = FallbackEstimator;

    c.bench_function("overall_progress_23_legs", |b| {
        b.iter(|| black_box(overall_progress(black_box(&legs), 12, 95.0)))
    });
    c.bench_function("fallback_ride", |b| {
        b.iter(|| black_box(fallback.ride(black_box(&legs[1]), 150.0)))
    });
}

fn bench_store_update(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let store = StateStore::in_memory(StoreConfig::default());
    let key = bot_state_key(1);
    let state = BotState::start(1, 1, 1, LegMode::Walk, 3, place("집", 127.0, 37.5).position(), test_start(), 30);
    let ttl = Duration::from_secs(3_600);
    runtime
        .block_on(store.set(&key, &state, ttl))
        .expect("seed state");

    c.bench_function("store_update_atomic", |b| {
        b.iter(|| {
            runtime
                .block_on(store.update_atomic(&key, ttl, |s: &mut BotState| {
                    s.progress_percent = (s.progress_percent + 0.1) % 100.0;
                }))
                .expect("update")
        })
    });
}

criterion_group!(benches, bench_direction_resolution, bench_progress, bench_store_update);
criterion_main!(benches);
