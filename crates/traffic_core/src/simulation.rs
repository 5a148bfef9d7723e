//! Simulation engine: per-segment live state advanced one tick at a time.
//!
//! State lives in ECS resources ([state]); a tick runs the chained systems in
//! [systems] (clock, segment flow, incident decay), gated on the engine not
//! being paused. [SimulationEngine] owns the world and applies control-plane
//! commands between ticks.

mod engine;
pub mod state;
pub mod systems;

pub use engine::{SegmentFeatures, SharedSimulation, SimStatus, SimulationEngine};
pub use state::{ControlState, Incident, LiveState, HISTORY_CAPACITY};
