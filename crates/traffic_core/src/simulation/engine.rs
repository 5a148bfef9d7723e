use std::collections::HashMap;
use std::sync::Arc;

use bevy_ecs::prelude::{Schedule, World};
use bevy_ecs::schedule::{ExecutorKind, IntoSystemConfigs};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::buffer::BoundedFifo;
use crate::catalog::{SegmentCatalog, SegmentId};
use crate::clock::{SimulationClock, SpeedMultiplier};
use crate::config::SimulationConfig;
use crate::congestion::speed_and_congestion;
use crate::error::TrafficError;
use crate::features::{build_feature_row, FeatureRow, SegmentSnapshot};
use crate::simulation::state::{
    Catalog, CongestionHistories, ControlState, Incident, Incidents, LiveState, LiveStates,
    SimRng, TickSettings,
};
use crate::simulation::systems::{
    advance_clock_system, incident_decay_system, is_running, segment_flow_system,
};
use crate::traffic::{clamp_demand_multiplier, Scenario};

/// Engine handle shared by the scheduler, routing and the service boundary.
///
/// Every tick and control mutation happens under this one lock, so readers
/// never see a half-written tick.
pub type SharedSimulation = Arc<Mutex<SimulationEngine>>;

/// Engine-wide status published alongside live rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimStatus {
    pub tick: u64,
    pub paused: bool,
    pub demand_multiplier: f64,
    pub day_of_week: u8,
    pub scenario: Scenario,
    pub simulation_speed_multiplier: SpeedMultiplier,
    pub time_of_day_minutes: u32,
    pub timestamp: DateTime<Utc>,
}

/// Feature row and label for one segment at the current tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentFeatures {
    pub segment_id: SegmentId,
    pub features: FeatureRow,
    pub target: f64,
}

/// Tick-driven traffic world: live state, histories, incidents and controls
/// held as ECS resources and advanced by a fixed schedule.
pub struct SimulationEngine {
    world: World,
    schedule: Schedule,
    catalog: Arc<SegmentCatalog>,
}

fn tick_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.set_executor_kind(ExecutorKind::SingleThreaded);
    schedule.add_systems(
        (
            advance_clock_system,
            segment_flow_system,
            incident_decay_system,
        )
            .chain()
            .run_if(is_running),
    );
    schedule
}

/// Initial live state: vehicles split by each segment's share of total capacity.
fn seeded_state(
    catalog: &SegmentCatalog,
    total_vehicles: u64,
    now: DateTime<Utc>,
) -> (LiveStates, CongestionHistories) {
    let total_capacity = u128::from(catalog.total_capacity().max(1));
    let mut histories = CongestionHistories::with_len(catalog.len());

    let live = catalog
        .segments()
        .iter()
        .zip(histories.0.iter_mut())
        .map(|(segment, history)| {
            let share = u128::from(total_vehicles) * u128::from(segment.capacity) / total_capacity;
            let vehicle_count = share as u64;
            let flow = speed_and_congestion(
                vehicle_count,
                f64::from(segment.capacity),
                segment.free_flow_speed,
            );
            history.push(flow.congestion_index);
            LiveState {
                segment_id: segment.id,
                timestamp: now,
                vehicle_count,
                avg_speed: flow.avg_speed,
                congestion_index: flow.congestion_index,
                incident_flag: 0,
            }
        })
        .collect();

    (LiveStates(live), histories)
}

impl SimulationEngine {
    pub fn new(catalog: Arc<SegmentCatalog>, config: &SimulationConfig) -> Self {
        let start = config.start_time.unwrap_or_else(Utc::now);
        let clock = SimulationClock::starting_at(start);
        let (live, histories) = seeded_state(&catalog, config.total_vehicles, clock.now());

        let mut world = World::new();
        world.insert_resource(Catalog(Arc::clone(&catalog)));
        world.insert_resource(TickSettings {
            tick_interval_secs: config.tick_interval_secs,
            total_vehicles: config.total_vehicles,
        });
        world.insert_resource(ControlState::new(clock));
        world.insert_resource(live);
        world.insert_resource(histories);
        world.insert_resource(Incidents::default());
        world.insert_resource(SimRng(StdRng::seed_from_u64(config.seed)));

        info!(
            segments = catalog.len(),
            total_vehicles = config.total_vehicles,
            seed = config.seed,
            "simulation engine initialised"
        );

        Self {
            world,
            schedule: tick_schedule(),
            catalog,
        }
    }

    /// Convenience constructor returning the shared handle.
    pub fn shared(catalog: Arc<SegmentCatalog>, config: &SimulationConfig) -> SharedSimulation {
        Arc::new(Mutex::new(Self::new(catalog, config)))
    }

    pub fn catalog(&self) -> &Arc<SegmentCatalog> {
        &self.catalog
    }

    /// Advance one tick. Returns `false` (and changes nothing) while paused.
    pub fn tick(&mut self) -> bool {
        let before = self.tick_count();
        self.schedule.run(&mut self.world);
        let advanced = self.tick_count() != before;
        if advanced {
            debug!(tick = self.tick_count(), "tick complete");
        }
        advanced
    }

    pub fn control(&self) -> ControlState {
        *self.world.resource::<ControlState>()
    }

    pub fn tick_count(&self) -> u64 {
        self.world.resource::<ControlState>().tick_count
    }

    pub fn is_paused(&self) -> bool {
        self.world.resource::<ControlState>().paused
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.world.resource::<ControlState>().clock.now()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.world.resource_mut::<ControlState>().paused = paused;
        info!(paused, "simulation pause toggled");
    }

    /// Set the demand multiplier, clamped to `[0.2, 2.5]`. Returns the stored value.
    pub fn set_demand_scenario(&mut self, multiplier: f64) -> f64 {
        let clamped = clamp_demand_multiplier(multiplier);
        self.world.resource_mut::<ControlState>().demand_multiplier = clamped;
        info!(demand_multiplier = clamped, "demand multiplier updated");
        clamped
    }

    /// Set weekday, scenario and speed, then move the clock forward to that
    /// weekday at `minute_of_day`.
    pub fn set_temporal_controls(
        &mut self,
        day_of_week: u8,
        minute_of_day: u32,
        scenario: Scenario,
        speed: SpeedMultiplier,
    ) {
        let mut control = self.world.resource_mut::<ControlState>();
        control.day_of_week = day_of_week.min(6);
        control.scenario = scenario;
        control.speed_multiplier = speed;
        let day = control.day_of_week;
        control.clock.align_to(day, minute_of_day);
        info!(
            day_of_week = day,
            minute_of_day,
            %scenario,
            %speed,
            "temporal controls updated"
        );
    }

    pub fn set_speed_multiplier(&mut self, speed: SpeedMultiplier) {
        self.world.resource_mut::<ControlState>().speed_multiplier = speed;
        info!(%speed, "speed multiplier updated");
    }

    /// Insert or replace an incident. Severity is clamped to `[0, 1]` and
    /// duration to at least one tick.
    pub fn inject_incident(
        &mut self,
        segment_id: SegmentId,
        severity: f64,
        duration_ticks: u32,
    ) -> Result<(), TrafficError> {
        if !self.catalog.contains(segment_id) {
            return Err(TrafficError::SegmentNotFound(segment_id));
        }
        let severity = if severity.is_nan() {
            0.0
        } else {
            severity.clamp(0.0, 1.0)
        };
        let incident = Incident {
            severity,
            remaining_ticks: duration_ticks.max(1),
        };
        self.world
            .resource_mut::<Incidents>()
            .0
            .insert(segment_id, incident);
        info!(segment_id, severity, duration_ticks = incident.remaining_ticks, "incident injected");
        Ok(())
    }

    pub fn incident(&self, segment_id: SegmentId) -> Option<Incident> {
        self.world.resource::<Incidents>().0.get(&segment_id).copied()
    }

    pub fn incidents(&self) -> &HashMap<SegmentId, Incident> {
        &self.world.resource::<Incidents>().0
    }

    /// Clear incidents and history, zero the tick counter, realign the clock to
    /// midnight of the configured weekday and reseed live state.
    pub fn reset(&mut self) {
        let total_vehicles = self.world.resource::<TickSettings>().total_vehicles;
        let now = {
            let mut control = self.world.resource_mut::<ControlState>();
            control.tick_count = 0;
            let day = control.day_of_week;
            control.clock.align_to_weekday(day);
            control.clock.now()
        };
        self.world.resource_mut::<Incidents>().0.clear();

        let (live, histories) = seeded_state(&self.catalog, total_vehicles, now);
        self.world.insert_resource(live);
        self.world.insert_resource(histories);
        info!(timestamp = %now, "simulation reset");
    }

    pub fn status(&self) -> SimStatus {
        let control = self.control();
        SimStatus {
            tick: control.tick_count,
            paused: control.paused,
            demand_multiplier: control.demand_multiplier,
            day_of_week: control.day_of_week,
            scenario: control.scenario,
            simulation_speed_multiplier: control.speed_multiplier,
            time_of_day_minutes: control.clock.minute_of_day(),
            timestamp: control.clock.now(),
        }
    }

    /// Live states in catalog order.
    pub fn live_states(&self) -> &[LiveState] {
        &self.world.resource::<LiveStates>().0
    }

    pub fn live_state(&self, segment_id: SegmentId) -> Option<LiveState> {
        let position = self.catalog.position(segment_id)?;
        self.live_states().get(position).copied()
    }

    pub fn history(&self, segment_id: SegmentId) -> Option<&BoundedFifo<f64>> {
        let position = self.catalog.position(segment_id)?;
        self.world.resource::<CongestionHistories>().0.get(position)
    }

    /// Feature row for one segment from its live state and history.
    pub fn feature_row(&self, segment_id: SegmentId) -> Option<FeatureRow> {
        let position = self.catalog.position(segment_id)?;
        self.feature_row_at(position).map(|f| f.features)
    }

    fn feature_row_at(&self, position: usize) -> Option<SegmentFeatures> {
        let segment = self.catalog.segments().get(position)?;
        let state = self.live_states().get(position)?;
        let history = self.world.resource::<CongestionHistories>().0.get(position)?;
        let snapshot = SegmentSnapshot {
            timestamp: state.timestamp,
            capacity: segment.capacity,
            vehicle_count: state.vehicle_count,
            incident_flag: state.incident_flag,
        };
        Some(SegmentFeatures {
            segment_id: segment.id,
            features: build_feature_row(&snapshot, history),
            target: state.congestion_index,
        })
    }

    /// Feature rows for every segment, labelled with its current congestion.
    pub fn feature_frame(&self) -> Vec<SegmentFeatures> {
        (0..self.catalog.len())
            .filter_map(|position| self.feature_row_at(position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{generate_segments, NetworkLayout};
    use chrono::TimeZone;

    fn engine(num_segments: usize, seed: u64) -> SimulationEngine {
        let catalog = SegmentCatalog::new(generate_segments(NetworkLayout::Scatter, num_segments, seed))
            .expect("valid catalog");
        let config = SimulationConfig {
            num_segments,
            total_vehicles: 2_000,
            seed,
            start_time: Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).single(),
            ..SimulationConfig::default()
        };
        SimulationEngine::new(Arc::new(catalog), &config)
    }

    #[test]
    fn initial_state_matches_capacity_share() {
        let engine = engine(10, 3);
        let total_capacity = engine.catalog().total_capacity();
        for (segment, state) in engine.catalog().segments().iter().zip(engine.live_states()) {
            let expected = 2_000 * u64::from(segment.capacity) / total_capacity;
            assert_eq!(state.vehicle_count, expected);
            assert_eq!(state.incident_flag, 0);
            assert_eq!(engine.history(segment.id).map(|h| h.len()), Some(1));
        }
    }

    #[test]
    fn tick_advances_clock_and_history() {
        let mut engine = engine(5, 1);
        let before = engine.now();
        assert!(engine.tick());
        assert_eq!(engine.tick_count(), 1);
        assert_eq!((engine.now() - before).num_milliseconds(), 1000);
        assert_eq!(engine.history(1).map(|h| h.len()), Some(2));
        assert!(engine.live_states().iter().all(|s| s.timestamp == engine.now()));
    }

    #[test]
    fn paused_tick_is_a_noop() {
        let mut engine = engine(5, 1);
        engine.set_paused(true);
        let live = engine.live_states().to_vec();
        assert!(!engine.tick());
        assert_eq!(engine.tick_count(), 0);
        assert_eq!(engine.live_states(), live.as_slice());
    }

    #[test]
    fn temporal_controls_realign_clock() {
        let mut engine = engine(3, 1);
        engine.set_temporal_controls(5, 8 * 60 + 30, Scenario::Evening, SpeedMultiplier::Double);
        let status = engine.status();
        assert_eq!(status.day_of_week, 5);
        assert_eq!(status.time_of_day_minutes, 510);
        assert_eq!(status.scenario, Scenario::Evening);
        assert_eq!(engine.control().clock.weekday(), 5);

        engine.tick();
        assert_eq!(engine.status().timestamp.timestamp() - status.timestamp.timestamp(), 2);
    }

    #[test]
    fn reset_restores_initial_conditions() {
        let mut engine = engine(6, 9);
        let initial = engine.live_states().iter().map(|s| s.vehicle_count).collect::<Vec<_>>();
        engine.inject_incident(2, 0.5, 10).expect("known segment");
        for _ in 0..5 {
            engine.tick();
        }
        engine.reset();
        assert_eq!(engine.tick_count(), 0);
        assert!(engine.incidents().is_empty());
        assert_eq!(engine.status().time_of_day_minutes, 0);
        let after = engine.live_states().iter().map(|s| s.vehicle_count).collect::<Vec<_>>();
        assert_eq!(initial, after);
        assert_eq!(engine.history(1).map(|h| h.len()), Some(1));
    }

    #[test]
    fn feature_frame_covers_every_segment() {
        let mut engine = engine(8, 2);
        engine.tick();
        let frame = engine.feature_frame();
        assert_eq!(frame.len(), 8);
        for row in &frame {
            let state = engine.live_state(row.segment_id).expect("live state");
            assert_eq!(row.target, state.congestion_index);
            assert_eq!(row.features.lag_1, state.congestion_index);
        }
    }
}
