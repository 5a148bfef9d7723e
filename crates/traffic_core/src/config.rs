//! Runtime configuration: TOML loading, defaults and validation.
//!
//! Every section carries `#[serde(default)]`, so an empty file yields the
//! default platform (1200 segments, 1 s ticks, retrain every 900 ticks).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::NetworkLayout;

/// Environment variable that overrides [`CacheConfig::redis_url`].
pub const REDIS_URL_ENV: &str = "REDIS_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrafficConfig {
    pub simulation: SimulationConfig,
    pub prediction: PredictionConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub bounds: NetworkBounds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub num_segments: usize,
    pub total_vehicles: u64,
    /// Simulated seconds per tick at 1x speed.
    pub tick_interval_secs: f64,
    pub seed: u64,
    /// Initial simulated instant; wall clock when unset.
    pub start_time: Option<DateTime<Utc>>,
    pub network: NetworkLayout,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_segments: 1200,
            total_vehicles: 120_000,
            tick_interval_secs: 1.0,
            seed: 42,
            start_time: None,
            network: NetworkLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictionConfig {
    pub max_rows: usize,
    pub max_segment_history: usize,
    pub min_training_rows: usize,
    pub retrain_interval_ticks: u64,
    pub holdout_fraction: f64,
    pub forest_trees: usize,
    pub forest_max_depth: usize,
    pub boosting_stages: usize,
    pub boosting_learning_rate: f64,
    pub boosting_max_depth: usize,
    pub model_seed: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_rows: 20_000,
            max_segment_history: 720,
            min_training_rows: 500,
            retrain_interval_ticks: 900,
            holdout_fraction: 0.2,
            forest_trees: 120,
            forest_max_depth: 12,
            boosting_stages: 100,
            boosting_learning_rate: 0.1,
            boosting_max_depth: 3,
            model_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Real-time pause between tick starts.
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
}

/// Coordinate box accepted for route queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Default for NetworkBounds {
    fn default() -> Self {
        Self {
            lat_min: 6.2,
            lat_max: 6.8,
            lon_min: 3.0,
            lon_max: 3.7,
        }
    }
}

impl NetworkBounds {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
    }
}

impl TrafficConfig {
    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.num_segments == 0 {
            return Err(ConfigError::Validation("simulation.num_segments must be > 0".into()));
        }
        if sim.total_vehicles == 0 {
            return Err(ConfigError::Validation("simulation.total_vehicles must be > 0".into()));
        }
        if !(sim.tick_interval_secs > 0.0) || !sim.tick_interval_secs.is_finite() {
            return Err(ConfigError::Validation(
                "simulation.tick_interval_secs must be a positive number".into(),
            ));
        }

        let pred = &self.prediction;
        if pred.max_rows == 0 || pred.max_segment_history == 0 {
            return Err(ConfigError::Validation(
                "prediction buffer capacities must be > 0".into(),
            ));
        }
        if pred.retrain_interval_ticks == 0 {
            return Err(ConfigError::Validation(
                "prediction.retrain_interval_ticks must be > 0".into(),
            ));
        }
        if !(pred.holdout_fraction > 0.0 && pred.holdout_fraction < 1.0) {
            return Err(ConfigError::Validation(
                "prediction.holdout_fraction must be in (0, 1)".into(),
            ));
        }
        if pred.forest_trees == 0 || pred.boosting_stages == 0 {
            return Err(ConfigError::Validation(
                "prediction ensembles need at least one tree".into(),
            ));
        }
        if !(pred.boosting_learning_rate > 0.0) {
            return Err(ConfigError::Validation(
                "prediction.boosting_learning_rate must be > 0".into(),
            ));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Validation("scheduler.tick_interval_ms must be > 0".into()));
        }

        let b = &self.bounds;
        if !(b.lat_min < b.lat_max && b.lon_min < b.lon_max) {
            return Err(ConfigError::Validation("bounds must satisfy min < max".into()));
        }
        Ok(())
    }

    /// Apply environment overrides (`REDIS_URL`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(REDIS_URL_ENV) {
            if !url.trim().is_empty() {
                self.cache.redis_url = Some(url);
            }
        }
        self
    }
}

/// Read, parse and validate a TOML config file.
pub fn load_from_file(path: &Path) -> Result<TrafficConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;
    load_from_str(&content, &path.display().to_string())
}

/// Parse and validate TOML content. `source_name` only appears in errors.
pub fn load_from_str(content: &str, source_name: &str) -> Result<TrafficConfig, ConfigError> {
    let config: TrafficConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}
