use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{SegmentCatalog, SegmentId};
use crate::congestion::{speed_from_congestion, travel_time_minutes};
use crate::error::TrafficError;
use crate::features::FeatureRow;
use crate::prediction::{Prediction, PredictionEngine};
use crate::routing::graph::{Edge, Path, RoadGraph};
use crate::simulation::SharedSimulation;
use crate::snapshot::round_to;

/// Source of predicted congestion for routing costs.
pub trait CongestionOracle: Send + Sync {
    fn predict(&self, features: &FeatureRow) -> Prediction;
}

impl CongestionOracle for PredictionEngine {
    fn predict(&self, features: &FeatureRow) -> Prediction {
        PredictionEngine::predict(self, features)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Live average speed.
    Current,
    /// Speed implied by the oracle's predicted congestion.
    Predicted,
}

/// Answer to a route query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAnalysis {
    /// Minutes at current speeds, 2 dp.
    pub estimated_current_travel_time_min: f64,
    /// Minutes at predicted speeds, 2 dp.
    pub predicted_travel_time_10_15_min: f64,
    pub segment_ids: Vec<SegmentId>,
    /// `[[start_lat, start_lon], [end_lat, end_lon]]` per traversed segment.
    pub route_geometry: Vec<[[f64; 2]; 2]>,
    /// Mean live congestion along the route, 4 dp.
    pub congestion_risk_score: f64,
}

#[derive(Debug, Clone, Copy)]
struct LiveReading {
    avg_speed: f64,
    congestion_index: f64,
    vehicle_count: u64,
    incident_flag: u8,
}

/// Live readings for every segment, copied under one simulation lock.
struct CostSnapshot {
    readings: Vec<LiveReading>,
}

impl CostSnapshot {
    fn capture(simulation: &SharedSimulation) -> Self {
        let engine = simulation.lock();
        let readings = engine
            .live_states()
            .iter()
            .map(|s| LiveReading {
                avg_speed: s.avg_speed,
                congestion_index: s.congestion_index,
                vehicle_count: s.vehicle_count,
                incident_flag: s.incident_flag,
            })
            .collect();
        Self { readings }
    }
}

/// Shortest-path queries over the road graph with live or predicted costs.
pub struct RoutingEngine {
    catalog: Arc<SegmentCatalog>,
    graph: RoadGraph,
    simulation: SharedSimulation,
    oracle: Arc<dyn CongestionOracle>,
}

impl RoutingEngine {
    /// Builds the graph once from the simulation's catalog.
    pub fn new(simulation: SharedSimulation, oracle: Arc<dyn CongestionOracle>) -> Self {
        let catalog = Arc::clone(simulation.lock().catalog());
        let graph = RoadGraph::from_catalog(&catalog);
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "road graph built"
        );
        Self {
            catalog,
            graph,
            simulation,
            oracle,
        }
    }

    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    fn predicted_cost(&self, position: usize, reading: &LiveReading) -> Option<f64> {
        let segment = self.catalog.segments().get(position)?;
        let capacity_ratio = reading.vehicle_count as f64 / f64::from(segment.capacity.max(1));
        let features = FeatureRow::from_current(
            reading.congestion_index,
            capacity_ratio,
            reading.incident_flag,
        );
        let predicted = self.oracle.predict(&features).predicted;
        let speed = speed_from_congestion(segment.free_flow_speed, predicted);
        Some(travel_time_minutes(segment.length_km, speed))
    }

    fn current_cost(&self, position: usize, reading: &LiveReading) -> Option<f64> {
        let segment = self.catalog.segments().get(position)?;
        Some(travel_time_minutes(segment.length_km, reading.avg_speed))
    }

    fn cost_at(&self, snapshot: &CostSnapshot, position: usize, mode: CostMode) -> f64 {
        let Some(reading) = snapshot.readings.get(position) else {
            return f64::INFINITY;
        };
        let cost = match mode {
            CostMode::Current => self.current_cost(position, reading),
            CostMode::Predicted => self.predicted_cost(position, reading),
        };
        cost.filter(|c| c.is_finite()).unwrap_or(f64::INFINITY)
    }

    /// Travel time in minutes for one segment; `None` for an unknown id.
    pub fn segment_cost(&self, segment_id: SegmentId, mode: CostMode) -> Option<f64> {
        let position = self.catalog.position(segment_id)?;
        let snapshot = CostSnapshot::capture(&self.simulation);
        Some(self.cost_at(&snapshot, position, mode))
    }

    fn search(&self, snapshot: &CostSnapshot, source: usize, target: usize, mode: CostMode) -> Path {
        let mut memo: HashMap<usize, f64> = HashMap::new();
        self.graph.shortest_path(source, target, |edge: &Edge| {
            *memo
                .entry(edge.position)
                .or_insert_with(|| self.cost_at(snapshot, edge.position, mode))
        })
    }

    /// Shortest path between two graph nodes under `mode`.
    pub fn shortest_path(&self, source: usize, target: usize, mode: CostMode) -> Path {
        let snapshot = CostSnapshot::capture(&self.simulation);
        self.search(&snapshot, source, target, mode)
    }

    /// Route between two coordinates under both cost modes.
    ///
    /// The predicted-mode path supplies the geometry when non-empty. An
    /// unreachable destination is [`TrafficError::RouteNotFound`].
    pub fn analyze_route(
        &self,
        origin: (f64, f64),
        destination: (f64, f64),
    ) -> Result<RouteAnalysis, TrafficError> {
        let source = self
            .graph
            .nearest_node(origin.0, origin.1)
            .ok_or(TrafficError::RouteNotFound)?;
        let target = self
            .graph
            .nearest_node(destination.0, destination.1)
            .ok_or(TrafficError::RouteNotFound)?;

        let snapshot = CostSnapshot::capture(&self.simulation);
        let current = self.search(&snapshot, source, target, CostMode::Current);
        if !current.is_reachable() {
            debug!(source, target, "no route between nodes");
            return Err(TrafficError::RouteNotFound);
        }
        let predicted = self.search(&snapshot, source, target, CostMode::Predicted);

        let selected = if predicted.segments.is_empty() {
            &current.segments
        } else {
            &predicted.segments
        };

        let mut route_geometry = Vec::with_capacity(selected.len());
        let mut congestion_sum = 0.0;
        for &segment_id in selected {
            let Some(position) = self.catalog.position(segment_id) else {
                continue;
            };
            if let Some(segment) = self.catalog.segments().get(position) {
                route_geometry.push(segment.geometry());
            }
            if let Some(reading) = snapshot.readings.get(position) {
                congestion_sum += reading.congestion_index;
            }
        }
        let risk = if selected.is_empty() {
            0.0
        } else {
            congestion_sum / selected.len() as f64
        };
        let predicted_time = if predicted.is_reachable() {
            predicted.cost
        } else {
            current.cost
        };

        Ok(RouteAnalysis {
            estimated_current_travel_time_min: round_to(current.cost, 2),
            predicted_travel_time_10_15_min: round_to(predicted_time, 2),
            segment_ids: selected.clone(),
            route_geometry,
            congestion_risk_score: round_to(risk, 4),
        })
    }
}
