#![allow(dead_code)]

use std::sync::atomic::AtomicBool;

use traffic_core::features::FeatureRow;
use traffic_core::platform::Platform;
use traffic_core::prediction::PredictionEngine;
use traffic_core::simulation::SharedSimulation;
use traffic_core::test_helpers::test_config;

/// Tick the shared simulation `n` times, returning how many ticks advanced.
pub fn tick_n(simulation: &SharedSimulation, n: usize) -> usize {
    let mut engine = simulation.lock();
    (0..n).filter(|_| engine.tick()).count()
}

/// Feed `ticks` worth of frames from the simulation into the prediction engine.
pub fn collect_observations(
    simulation: &SharedSimulation,
    prediction: &PredictionEngine,
    ticks: usize,
) {
    for _ in 0..ticks {
        let (tick, frame) = {
            let mut engine = simulation.lock();
            engine.tick();
            (engine.tick_count(), engine.feature_frame())
        };
        prediction.add_observations(&frame, tick);
    }
}

/// Platform over a small grid with fast ticks and small models.
pub async fn test_platform(num_segments: usize) -> Platform {
    Platform::build(test_config(num_segments))
        .await
        .expect("helper config should build")
}

/// Feature row where every history-derived field equals `congestion`.
pub fn flat_row(congestion: f64) -> FeatureRow {
    FeatureRow::from_current(congestion, 0.5, 0)
}

pub fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}
