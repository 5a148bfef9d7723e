//! Tick systems, run in order: clock, segment flow, incident decay.

use bevy_ecs::prelude::{Res, ResMut};
use rand::Rng;
use tracing::warn;

use crate::catalog::Segment;
use crate::congestion::{speed_and_congestion, MIN_ROUTING_SPEED_KMH};
use crate::simulation::state::{
    Catalog, CongestionHistories, ControlState, Incidents, LiveState, LiveStates, SimRng,
    TickSettings,
};
use crate::traffic::demand_factor;

/// Capacity reduction per unit of incident severity.
pub const INCIDENT_CAPACITY_LOSS: f64 = 0.75;

/// Capacity an incident can never push a segment below.
pub const MIN_EFFECTIVE_CAPACITY: f64 = 50.0;

const INFLOW_JITTER: (f64, f64) = (0.001, 0.006);
const OUTFLOW_JITTER: (f64, f64) = (0.03, 0.09);
const NOISE_VEHICLES: i64 = 25;

/// Run condition: the engine is not paused.
pub fn is_running(control: Res<ControlState>) -> bool {
    !control.paused
}

pub fn advance_clock_system(mut control: ResMut<ControlState>, settings: Res<TickSettings>) {
    let speed = control.speed_multiplier;
    control.tick_count += 1;
    control.clock.advance(settings.tick_interval_secs, speed);
}

/// Capacity left after an incident of `severity`.
pub fn effective_capacity(capacity: u32, severity: f64) -> f64 {
    (f64::from(capacity) * (1.0 - INCIDENT_CAPACITY_LOSS * severity))
        .floor()
        .max(MIN_EFFECTIVE_CAPACITY)
}

/// Random draws for one segment's tick.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlowDraw {
    pub noise: i64,
    pub inflow_jitter: f64,
    pub outflow_jitter: f64,
}

impl FlowDraw {
    pub(crate) fn sample<R: Rng>(rng: &mut R) -> Self {
        Self {
            noise: rng.gen_range(-NOISE_VEHICLES..=NOISE_VEHICLES),
            inflow_jitter: rng.gen_range(INFLOW_JITTER.0..INFLOW_JITTER.1),
            outflow_jitter: rng.gen_range(OUTFLOW_JITTER.0..OUTFLOW_JITTER.1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SegmentFault {
    NonFiniteFlow,
}

/// Next live state for one segment, or a fault that leaves the previous one in place.
pub(crate) fn step_segment(
    segment: &Segment,
    prev: &LiveState,
    severity: f64,
    demand: f64,
    draw: FlowDraw,
    control: &ControlState,
) -> Result<LiveState, SegmentFault> {
    let capacity = effective_capacity(segment.capacity, severity);

    let inflow = (demand * f64::from(segment.capacity) * draw.inflow_jitter).floor();
    let outflow = (prev.avg_speed.max(MIN_ROUTING_SPEED_KMH) * draw.outflow_jitter).floor();
    if !inflow.is_finite() || !outflow.is_finite() {
        return Err(SegmentFault::NonFiniteFlow);
    }

    let next = prev.vehicle_count as i64 + inflow as i64 - outflow as i64 + draw.noise;
    let vehicle_count = next.max(0) as u64;

    let flow = speed_and_congestion(vehicle_count, capacity, segment.free_flow_speed);
    if !flow.avg_speed.is_finite() || !flow.congestion_index.is_finite() {
        return Err(SegmentFault::NonFiniteFlow);
    }

    Ok(LiveState {
        segment_id: segment.id,
        timestamp: control.clock.now(),
        vehicle_count,
        avg_speed: flow.avg_speed,
        congestion_index: flow.congestion_index,
        incident_flag: u8::from(severity > 0.0),
    })
}

pub fn segment_flow_system(
    catalog: Res<Catalog>,
    control: Res<ControlState>,
    incidents: Res<Incidents>,
    mut live: ResMut<LiveStates>,
    mut history: ResMut<CongestionHistories>,
    mut rng: ResMut<SimRng>,
) {
    let demand = demand_factor(
        control.scenario,
        control.clock.hour(),
        control.day_of_week,
        control.demand_multiplier,
    );

    for (position, segment) in catalog.0.segments().iter().enumerate() {
        let draw = FlowDraw::sample(&mut rng.0);
        let Some(prev) = live.0.get(position).copied() else {
            warn!(segment_id = segment.id, "no live state for segment; skipping");
            continue;
        };
        let severity = incidents.severity(segment.id);

        match step_segment(segment, &prev, severity, demand, draw, &control) {
            Ok(next) => {
                live.0[position] = next;
                if let Some(h) = history.0.get_mut(position) {
                    h.push(next.congestion_index);
                }
            }
            Err(fault) => {
                warn!(segment_id = segment.id, ?fault, "segment update failed; keeping previous state");
            }
        }
    }
}

pub fn incident_decay_system(mut incidents: ResMut<Incidents>) {
    incidents.0.retain(|_, incident| {
        incident.remaining_ticks = incident.remaining_ticks.saturating_sub(1);
        incident.remaining_ticks > 0
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RoadType;
    use crate::clock::SimulationClock;
    use chrono::{TimeZone, Utc};

    fn segment() -> Segment {
        Segment {
            id: 1,
            start_lat: 6.5,
            start_lon: 3.3,
            end_lat: 6.501,
            end_lon: 3.301,
            length_km: 0.15,
            capacity: 1000,
            free_flow_speed: 50.0,
            road_type: RoadType::Primary,
        }
    }

    fn control() -> ControlState {
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).single().expect("valid");
        ControlState::new(SimulationClock::starting_at(start))
    }

    fn prev(vehicle_count: u64) -> LiveState {
        LiveState {
            segment_id: 1,
            timestamp: control().clock.now(),
            vehicle_count,
            avg_speed: 50.0,
            congestion_index: 0.0,
            incident_flag: 0,
        }
    }

    #[test]
    fn effective_capacity_floor() {
        assert_eq!(effective_capacity(1000, 0.0), 1000.0);
        assert_eq!(effective_capacity(1000, 0.5), 625.0);
        assert_eq!(effective_capacity(100, 1.0), MIN_EFFECTIVE_CAPACITY);
    }

    #[test]
    fn vehicle_count_never_negative() {
        let draw = FlowDraw {
            noise: -NOISE_VEHICLES,
            inflow_jitter: INFLOW_JITTER.0,
            outflow_jitter: OUTFLOW_JITTER.1,
        };
        let next = step_segment(&segment(), &prev(0), 0.0, 0.45, draw, &control()).expect("step");
        assert_eq!(next.vehicle_count, 0);
        assert_eq!(next.congestion_index, 0.0);
        assert_eq!(next.avg_speed, 50.0);
    }

    #[test]
    fn incident_sets_flag_and_slows_traffic() {
        let draw = FlowDraw {
            noise: 0,
            inflow_jitter: 0.003,
            outflow_jitter: 0.05,
        };
        let clear = step_segment(&segment(), &prev(400), 0.0, 1.0, draw, &control()).expect("step");
        let blocked = step_segment(&segment(), &prev(400), 0.8, 1.0, draw, &control()).expect("step");
        assert_eq!(clear.incident_flag, 0);
        assert_eq!(blocked.incident_flag, 1);
        assert_eq!(clear.vehicle_count, blocked.vehicle_count);
        assert!(blocked.congestion_index > clear.congestion_index);
    }

    #[test]
    fn non_finite_demand_is_a_fault() {
        let draw = FlowDraw {
            noise: 0,
            inflow_jitter: 0.003,
            outflow_jitter: 0.05,
        };
        let result = step_segment(&segment(), &prev(10), 0.0, f64::NAN, draw, &control());
        assert_eq!(result, Err(SegmentFault::NonFiniteFlow));
    }
}
