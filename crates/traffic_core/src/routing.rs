//! Routing: road graph construction and dual-mode shortest paths.
//!
//! - **[graph]**: nodes from deduplicated segment endpoints, undirected edges
//!   labelled with segment ids, Dijkstra with early exit.
//! - **[RoutingEngine]**: edge costs from live speeds ([CostMode::Current]) or
//!   from a [CongestionOracle] fed a stand-in feature vector built from the
//!   segment's current congestion ([CostMode::Predicted]).
//!
//! Each query copies live readings once under the simulation lock and
//! memoises per-segment costs for the duration of the search.

mod engine;
pub mod graph;

pub use engine::{CongestionOracle, CostMode, RouteAnalysis, RoutingEngine};
pub use graph::{Edge, NodeId, Path, RoadGraph};
