//! Core operations behind the request boundary.
//!
//! Reads come from the publication cache (live rows, status, metrics) or, for
//! per-segment predictions and routes, from the engines directly. Control
//! operations validate their input first, mutate the simulation under its
//! lock, then republish the control state.

use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheKey, StateCache};
use crate::catalog::SegmentId;
use crate::clock::{SpeedMultiplier, MINUTES_PER_DAY};
use crate::config::NetworkBounds;
use crate::error::TrafficError;
use crate::prediction::{ModelMetrics, PredictionEngine, DEFAULT_HISTORY_LIMIT};
use crate::routing::{RouteAnalysis, RoutingEngine};
use crate::simulation::{ControlState, SharedSimulation};
use crate::snapshot::{round_to, HeatmapRow, StatusSnapshot};
use crate::traffic::{Scenario, DEMAND_MULTIPLIER_RANGE};

pub const LIVE_LIMIT_RANGE: RangeInclusive<usize> = 1..=5000;
pub const DEFAULT_LIVE_LIMIT: usize = 300;
pub const INCIDENT_DURATION_RANGE: RangeInclusive<u32> = 1..=3600;
pub const DEFAULT_INCIDENT_DURATION: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Published rows plus the status they were published with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePage {
    /// Rows available, before any limit.
    pub count: usize,
    pub items: Vec<HeatmapRow>,
    pub status: Option<StatusSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPrediction {
    pub segment_id: SegmentId,
    pub historical_congestion: Vec<f64>,
    pub predicted_congestion: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub model: String,
    pub metrics: Option<ModelMetrics>,
}

/// Handle the boundary layer holds; cheap to clone.
#[derive(Clone)]
pub struct TrafficService {
    simulation: SharedSimulation,
    prediction: Arc<PredictionEngine>,
    routing: Arc<RoutingEngine>,
    cache: StateCache,
    bounds: NetworkBounds,
}

fn check_range<T>(field: &'static str, value: T, range: RangeInclusive<T>) -> Result<T, TrafficError>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(TrafficError::validation(
            field,
            format!("{value} is outside {}..={}", range.start(), range.end()),
        ))
    }
}

impl TrafficService {
    pub fn new(
        simulation: SharedSimulation,
        prediction: Arc<PredictionEngine>,
        routing: Arc<RoutingEngine>,
        cache: StateCache,
        bounds: NetworkBounds,
    ) -> Self {
        Self {
            simulation,
            prediction,
            routing,
            cache,
            bounds,
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub async fn get_live_segments(&self, limit: usize) -> Result<LivePage, TrafficError> {
        let limit = check_range("limit", limit, LIVE_LIMIT_RANGE)?;
        let mut page = self.page(CacheKey::LiveSegments).await;
        page.items.truncate(limit);
        Ok(page)
    }

    pub async fn get_live_heatmap(&self) -> LivePage {
        self.page(CacheKey::LiveHeatmap).await
    }

    async fn page(&self, key: CacheKey) -> LivePage {
        let items: Vec<HeatmapRow> = self.cache.get_or(key, Vec::new()).await;
        LivePage {
            count: items.len(),
            items,
            status: self.cache.get(CacheKey::SimStatus).await,
        }
    }

    /// Prediction for one segment from its current state and real history.
    pub fn get_segment_prediction(
        &self,
        segment_id: SegmentId,
    ) -> Result<SegmentPrediction, TrafficError> {
        let features = self
            .simulation
            .lock()
            .feature_row(segment_id)
            .ok_or(TrafficError::SegmentNotFound(segment_id))?;
        let prediction = self.prediction.predict(&features);
        let state = self.prediction.model_state();
        Ok(SegmentPrediction {
            segment_id,
            historical_congestion: self
                .prediction
                .segment_history(segment_id, DEFAULT_HISTORY_LIMIT),
            predicted_congestion: round_to(prediction.predicted, 4),
            confidence_lower: round_to(prediction.lower, 4),
            confidence_upper: round_to(prediction.upper, 4),
            model: state.predictor.name().to_string(),
            metrics: state.metrics.clone(),
        })
    }

    /// Last published metrics; `None` before the first successful retrain.
    pub async fn get_model_metrics(&self) -> Option<ModelMetrics> {
        self.cache
            .get::<Option<ModelMetrics>>(CacheKey::ModelMetrics)
            .await
            .flatten()
    }

    pub fn analyze_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteAnalysis, TrafficError> {
        self.check_bounds("origin", origin)?;
        self.check_bounds("destination", destination)?;
        self.routing
            .analyze_route((origin.lat, origin.lon), (destination.lat, destination.lon))
    }

    fn check_bounds(&self, field: &'static str, point: Coordinate) -> Result<(), TrafficError> {
        if self.bounds.contains(point.lat, point.lon) {
            return Ok(());
        }
        let b = &self.bounds;
        Err(TrafficError::validation(
            field,
            format!(
                "({}, {}) is outside lat {}..={}, lon {}..={}",
                point.lat, point.lon, b.lat_min, b.lat_max, b.lon_min, b.lon_max
            ),
        ))
    }

    /// Returns the applied multiplier.
    pub async fn set_demand_scenario(&self, multiplier: f64) -> Result<f64, TrafficError> {
        let (low, high) = DEMAND_MULTIPLIER_RANGE;
        let multiplier = check_range("multiplier", multiplier, low..=high)?;
        let (applied, control) = {
            let mut engine = self.simulation.lock();
            let applied = engine.set_demand_scenario(multiplier);
            (applied, engine.control())
        };
        self.publish_control(&control).await;
        Ok(applied)
    }

    pub async fn set_temporal_controls(
        &self,
        day_of_week: u8,
        minute_of_day: u32,
        scenario: &str,
        speed: f64,
    ) -> Result<StatusSnapshot, TrafficError> {
        let day_of_week = check_range("day_of_week", day_of_week, 0..=6)?;
        let minute_of_day = check_range("minute_of_day", minute_of_day, 0..=MINUTES_PER_DAY - 1)?;
        let scenario: Scenario = scenario.parse()?;
        let speed = SpeedMultiplier::try_from(speed)?;

        let (control, status) = {
            let mut engine = self.simulation.lock();
            engine.set_temporal_controls(day_of_week, minute_of_day, scenario, speed);
            (engine.control(), engine.status())
        };
        self.publish_control(&control).await;
        Ok(self.tag_status(status))
    }

    pub async fn set_speed_multiplier(&self, speed: f64) -> Result<StatusSnapshot, TrafficError> {
        let speed = SpeedMultiplier::try_from(speed)?;
        let (control, status) = {
            let mut engine = self.simulation.lock();
            engine.set_speed_multiplier(speed);
            (engine.control(), engine.status())
        };
        self.publish_control(&control).await;
        Ok(self.tag_status(status))
    }

    pub async fn inject_incident(
        &self,
        segment_id: SegmentId,
        severity: f64,
        duration_ticks: u32,
    ) -> Result<(), TrafficError> {
        let severity = check_range("severity", severity, 0.0..=1.0)?;
        let duration_ticks = check_range("duration_ticks", duration_ticks, INCIDENT_DURATION_RANGE)?;
        let control = {
            let mut engine = self.simulation.lock();
            engine.inject_incident(segment_id, severity, duration_ticks)?;
            engine.control()
        };
        self.publish_control(&control).await;
        Ok(())
    }

    pub async fn set_paused(&self, paused: bool) -> StatusSnapshot {
        let (control, status) = {
            let mut engine = self.simulation.lock();
            engine.set_paused(paused);
            (engine.control(), engine.status())
        };
        self.publish_control(&control).await;
        self.tag_status(status)
    }

    pub async fn reset(&self) -> StatusSnapshot {
        let (control, status) = {
            let mut engine = self.simulation.lock();
            engine.reset();
            (engine.control(), engine.status())
        };
        self.publish_control(&control).await;
        self.tag_status(status)
    }

    /// Current status straight from the engine, not the cache.
    pub fn status(&self) -> StatusSnapshot {
        let status = self.simulation.lock().status();
        self.tag_status(status)
    }

    fn tag_status(&self, simulation: crate::simulation::SimStatus) -> StatusSnapshot {
        StatusSnapshot {
            simulation,
            model: self.prediction.model_name().to_string(),
        }
    }

    async fn publish_control(&self, control: &ControlState) {
        self.cache.set(CacheKey::SimControlState, control).await;
        debug!(tick = control.tick_count, "control state published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_names_field() {
        assert_eq!(check_range("limit", 5usize, LIVE_LIMIT_RANGE), Ok(5));
        let err = check_range("limit", 0usize, LIVE_LIMIT_RANGE).unwrap_err();
        assert_eq!(err.to_string(), "invalid limit: 0 is outside 1..=5000");
    }

    #[test]
    fn nan_is_out_of_range() {
        assert!(check_range("severity", f64::NAN, 0.0..=1.0).is_err());
    }
}
