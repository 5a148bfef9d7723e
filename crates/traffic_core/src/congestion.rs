//! Load-based congestion model shared by the simulation, feature builder and
//! routing cost functions.
//!
//! `load = vehicles / capacity`, `speed = free_flow * (1 - load²)` floored at
//! [`MIN_AVG_SPEED_KMH`], `congestion = 1 - speed / free_flow` clamped to `[0, 1]`.

/// Slowest average speed the model reports.
pub const MIN_AVG_SPEED_KMH: f64 = 1.0;

/// Speed floor used when turning speeds into travel times.
pub const MIN_ROUTING_SPEED_KMH: f64 = 5.0;

/// Output of [`speed_and_congestion`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowState {
    /// km/h, always `>= MIN_AVG_SPEED_KMH`
    pub avg_speed: f64,
    /// in `[0, 1]`
    pub congestion_index: f64,
}

/// Average speed and congestion index for a vehicle count on a segment.
///
/// Capacity is floored at 1 and free-flow speed at 1.0 km/h.
pub fn speed_and_congestion(vehicle_count: u64, capacity: f64, free_flow_speed: f64) -> FlowState {
    let capacity = capacity.max(1.0);
    let free_flow = free_flow_speed.max(1.0);

    let load = vehicle_count as f64 / capacity;
    let avg_speed = (free_flow * (1.0 - load * load)).max(MIN_AVG_SPEED_KMH);
    let congestion_index = (1.0 - avg_speed / free_flow).clamp(0.0, 1.0);

    FlowState {
        avg_speed,
        congestion_index,
    }
}

/// Minutes to traverse `length_km` at `speed_kmh` (floored at [`MIN_ROUTING_SPEED_KMH`]).
pub fn travel_time_minutes(length_km: f64, speed_kmh: f64) -> f64 {
    length_km / speed_kmh.max(MIN_ROUTING_SPEED_KMH) * 60.0
}

/// Speed implied by a congestion value, floored for routing.
pub fn speed_from_congestion(free_flow_speed: f64, congestion: f64) -> f64 {
    (free_flow_speed * (1.0 - congestion)).max(MIN_ROUTING_SPEED_KMH)
}
