//! Performance benchmarks for traffic_core using Criterion.rs.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use traffic_core::catalog::{generate_segments, NetworkLayout, SegmentCatalog};
use traffic_core::config::{PredictionConfig, SimulationConfig};
use traffic_core::prediction::{fit_model, Observation, PredictionEngine};
use traffic_core::routing::{CostMode, RoutingEngine};
use traffic_core::simulation::SimulationEngine;
use traffic_core::test_helpers::{small_prediction_config, test_simulation, test_start_time};

fn bench_tick(c: &mut Criterion) {
    let sizes = [("small", 100), ("default", 1_200), ("large", 5_000)];

    let mut group = c.benchmark_group("simulation_tick");
    for (name, num_segments) in sizes {
        let catalog = Arc::new(
            SegmentCatalog::new(generate_segments(NetworkLayout::Scatter, num_segments, 42))
                .expect("valid catalog"),
        );
        let config = SimulationConfig {
            num_segments,
            total_vehicles: num_segments as u64 * 100,
            start_time: Some(test_start_time()),
            ..SimulationConfig::default()
        };
        let mut engine = SimulationEngine::new(catalog, &config);
        group.bench_with_input(BenchmarkId::from_parameter(name), &num_segments, |b, _| {
            b.iter(|| {
                engine.tick();
                black_box(engine.feature_frame());
            });
        });
    }
    group.finish();
}

fn bench_shortest_path(c: &mut Criterion) {
    let simulation = test_simulation(2_000);
    let oracle = Arc::new(PredictionEngine::new(PredictionConfig::default()));
    let routing = RoutingEngine::new(simulation, oracle);
    let target = routing.graph().node_count() - 1;

    let mut group = c.benchmark_group("shortest_path");
    for mode in [CostMode::Current, CostMode::Predicted] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{mode:?}")), &mode, |b, &mode| {
            b.iter(|| black_box(routing.shortest_path(0, target, mode)));
        });
    }
    group.finish();
}

fn bench_training(c: &mut Criterion) {
    let simulation = test_simulation(100);
    let mut rows: Vec<Observation> = Vec::new();
    for _ in 0..20 {
        let mut engine = simulation.lock();
        engine.tick();
        let tick = engine.tick_count();
        rows.extend(engine.feature_frame().into_iter().map(|row| Observation {
            features: row.features.to_vector(),
            target: row.target,
            tick,
            sequence: 0,
            segment_id: row.segment_id,
        }));
    }
    for (sequence, row) in rows.iter_mut().enumerate() {
        row.sequence = sequence as u64;
    }
    let config = PredictionConfig {
        forest_trees: 20,
        forest_max_depth: 8,
        boosting_stages: 30,
        ..small_prediction_config()
    };
    let cancel = AtomicBool::new(false);

    c.bench_function("fit_model_2000_rows", |b| {
        b.iter(|| black_box(fit_model(rows.clone(), &config, 20, &cancel).is_ok()));
    });
}

criterion_group!(benches, bench_tick, bench_shortest_path, bench_training);
criterion_main!(benches);
