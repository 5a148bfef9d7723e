//! Published records: enriched live rows, heatmap rows and the status block.
//!
//! Values are rounded on the way out (speed 2 dp, congestion 4 dp, travel
//! time 3 dp); engines keep full precision internally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{RoadType, Segment, SegmentId};
use crate::congestion::{speed_from_congestion, travel_time_minutes};
use crate::prediction::Prediction;
use crate::simulation::{LiveState, SimStatus};

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Live state joined with the segment's static attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveRow {
    pub segment_id: SegmentId,
    pub timestamp: DateTime<Utc>,
    pub vehicle_count: u64,
    pub avg_speed: f64,
    pub congestion_index: f64,
    pub incident_flag: u8,
    pub length: f64,
    pub capacity: u32,
    pub free_flow_speed: f64,
    pub road_type: RoadType,
    pub geometry: [[f64; 2]; 2],
}

impl LiveRow {
    pub fn new(segment: &Segment, state: &LiveState) -> Self {
        Self {
            segment_id: segment.id,
            timestamp: state.timestamp,
            vehicle_count: state.vehicle_count,
            avg_speed: round_to(state.avg_speed, 2),
            congestion_index: round_to(state.congestion_index, 4),
            incident_flag: state.incident_flag,
            length: segment.length_km,
            capacity: segment.capacity,
            free_flow_speed: segment.free_flow_speed,
            road_type: segment.road_type,
            geometry: segment.geometry(),
        }
    }
}

/// Live row plus the predicted congestion band and both travel-time estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapRow {
    #[serde(flatten)]
    pub live: LiveRow,
    pub predicted_congestion: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub estimated_segment_travel_time_min: f64,
    pub predicted_segment_travel_time_min: f64,
}

impl HeatmapRow {
    pub fn new(segment: &Segment, state: &LiveState, prediction: &Prediction) -> Self {
        let predicted_speed = speed_from_congestion(segment.free_flow_speed, prediction.predicted);
        Self {
            live: LiveRow::new(segment, state),
            predicted_congestion: round_to(prediction.predicted, 4),
            confidence_lower: round_to(prediction.lower, 4),
            confidence_upper: round_to(prediction.upper, 4),
            estimated_segment_travel_time_min: round_to(
                travel_time_minutes(segment.length_km, state.avg_speed),
                3,
            ),
            predicted_segment_travel_time_min: round_to(
                travel_time_minutes(segment.length_km, predicted_speed),
                3,
            ),
        }
    }
}

/// Simulation status tagged with the active model's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub simulation: SimStatus,
    pub model: String,
}
