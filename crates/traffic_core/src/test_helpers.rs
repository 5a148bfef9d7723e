//! Test helpers for common test setup and utilities.
//!
//! Deterministic catalogs, a fixed start instant and small configs so unit
//! tests, integration tests and benches build the same worlds.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::catalog::{generate_segments, NetworkLayout, SegmentCatalog};
use crate::config::{PredictionConfig, SchedulerConfig, SimulationConfig, TrafficConfig};
use crate::simulation::{SharedSimulation, SimulationEngine};

/// Seed shared by every helper-built catalog.
pub const TEST_SEED: u64 = 7;

/// Vehicles per segment in helper configs.
pub const VEHICLES_PER_SEGMENT: u64 = 100;

/// Monday 2024-01-01 08:00 UTC.
///
/// # Panics
///
/// Panics if the constant date is invalid (should never happen).
pub fn test_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
        .single()
        .expect("fixed test start time should be valid")
}

/// Connected grid catalog of `num_segments` segments.
///
/// # Panics
///
/// Panics if the generator produces an invalid catalog (should never happen).
pub fn test_catalog(num_segments: usize) -> Arc<SegmentCatalog> {
    let segments = generate_segments(NetworkLayout::Grid, num_segments, TEST_SEED);
    Arc::new(SegmentCatalog::new(segments).expect("generated grid should be a valid catalog"))
}

pub fn test_simulation_config(num_segments: usize) -> SimulationConfig {
    SimulationConfig {
        num_segments,
        total_vehicles: num_segments as u64 * VEHICLES_PER_SEGMENT,
        tick_interval_secs: 1.0,
        seed: TEST_SEED,
        start_time: Some(test_start_time()),
        network: NetworkLayout::Grid,
    }
}

/// Prediction config that retrains quickly on a handful of ticks.
pub fn small_prediction_config() -> PredictionConfig {
    PredictionConfig {
        min_training_rows: 60,
        retrain_interval_ticks: 5,
        forest_trees: 8,
        forest_max_depth: 4,
        boosting_stages: 10,
        boosting_max_depth: 2,
        ..PredictionConfig::default()
    }
}

/// Full platform config: grid network, small models, 5 ms ticks.
pub fn test_config(num_segments: usize) -> TrafficConfig {
    TrafficConfig {
        simulation: test_simulation_config(num_segments),
        prediction: small_prediction_config(),
        scheduler: SchedulerConfig { tick_interval_ms: 5 },
        ..TrafficConfig::default()
    }
}

/// Shared simulation over [`test_catalog`] starting at [`test_start_time`].
pub fn test_simulation(num_segments: usize) -> SharedSimulation {
    SimulationEngine::shared(test_catalog(num_segments), &test_simulation_config(num_segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn start_time_is_monday_morning() {
        let start = test_start_time();
        assert_eq!(start.weekday().num_days_from_monday(), 0);
        assert_eq!(start.hour(), 8);
    }

    #[test]
    fn catalog_is_deterministic() {
        let a = test_catalog(24);
        let b = test_catalog(24);
        assert_eq!(a.len(), 24);
        assert_eq!(a.segments(), b.segments());
    }

    #[test]
    fn helper_config_validates() {
        assert!(test_config(12).validate().is_ok());
    }
}
