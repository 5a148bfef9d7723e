use std::collections::HashMap;
use std::sync::Arc;

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::buffer::BoundedFifo;
use crate::catalog::{SegmentCatalog, SegmentId};
use crate::clock::{SimulationClock, SpeedMultiplier};
use crate::traffic::Scenario;

/// Capacity of each segment's congestion history.
pub const HISTORY_CAPACITY: usize = 3600;

/// Live condition of one segment. Replaced wholesale every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub segment_id: SegmentId,
    pub timestamp: DateTime<Utc>,
    pub vehicle_count: u64,
    /// km/h, `>= 1.0`
    pub avg_speed: f64,
    /// in `[0, 1]`
    pub congestion_index: f64,
    /// 0 or 1
    pub incident_flag: u8,
}

/// Active capacity reduction on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// in `[0, 1]`
    pub severity: f64,
    /// `>= 1` while stored
    pub remaining_ticks: u32,
}

/// Engine-wide operator controls and counters.
#[derive(Debug, Clone, Copy, PartialEq, Resource, Serialize, Deserialize)]
pub struct ControlState {
    pub paused: bool,
    pub demand_multiplier: f64,
    /// `0 = Monday .. 6 = Sunday`
    pub day_of_week: u8,
    pub scenario: Scenario,
    pub speed_multiplier: SpeedMultiplier,
    pub tick_count: u64,
    pub clock: SimulationClock,
}

impl ControlState {
    pub fn new(clock: SimulationClock) -> Self {
        Self {
            paused: false,
            demand_multiplier: 1.0,
            day_of_week: clock.weekday(),
            scenario: Scenario::default(),
            speed_multiplier: SpeedMultiplier::default(),
            tick_count: 0,
            clock,
        }
    }
}

/// Shared, immutable segment list.
#[derive(Debug, Clone, Resource)]
pub struct Catalog(pub Arc<SegmentCatalog>);

/// Fixed per-engine settings.
#[derive(Debug, Clone, Copy, Resource)]
pub struct TickSettings {
    pub tick_interval_secs: f64,
    pub total_vehicles: u64,
}

/// Live state per segment, index-aligned with the catalog.
#[derive(Debug, Clone, Default, Resource)]
pub struct LiveStates(pub Vec<LiveState>);

/// Congestion history per segment, index-aligned with the catalog.
#[derive(Debug, Clone, Default, Resource)]
pub struct CongestionHistories(pub Vec<BoundedFifo<f64>>);

impl CongestionHistories {
    pub fn with_len(len: usize) -> Self {
        Self((0..len).map(|_| BoundedFifo::new(HISTORY_CAPACITY)).collect())
    }
}

#[derive(Debug, Clone, Default, Resource)]
pub struct Incidents(pub HashMap<SegmentId, Incident>);

impl Incidents {
    pub fn severity(&self, segment_id: SegmentId) -> f64 {
        self.0.get(&segment_id).map(|i| i.severity).unwrap_or(0.0)
    }
}

/// Seeded RNG driving the stochastic flows.
#[derive(Debug, Resource)]
pub struct SimRng(pub StdRng);
