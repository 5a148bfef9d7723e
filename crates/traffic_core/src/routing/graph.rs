//! Road graph derived from segment endpoints.
//!
//! Endpoints that round to the same 4-decimal-degree cell (about 11 m) share a
//! node. Every segment becomes one undirected edge labelled with its id.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::catalog::{flat_distance_km, SegmentCatalog, SegmentId};

pub type NodeId = usize;

/// Degrees are scaled by this and rounded to form the node key.
const NODE_KEY_SCALE: f64 = 1e4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub to: NodeId,
    pub segment_id: SegmentId,
    /// Catalog position of the segment.
    pub position: usize,
}

/// Result of a shortest-path search.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Visited nodes from source to target; empty if unreachable.
    pub nodes: Vec<NodeId>,
    /// Traversed segments in order.
    pub segments: Vec<SegmentId>,
    /// Total cost in minutes; infinite if unreachable.
    pub cost: f64,
}

impl Path {
    pub fn unreachable() -> Self {
        Self {
            nodes: Vec::new(),
            segments: Vec::new(),
            cost: f64::INFINITY,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.cost.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct QueueEntry {
    cost: f64,
    node: NodeId,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by cost.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct RoadGraph {
    coords: Vec<(f64, f64)>,
    adjacency: Vec<Vec<Edge>>,
    segment_nodes: HashMap<SegmentId, (NodeId, NodeId)>,
}

fn node_key(lat: f64, lon: f64) -> (i64, i64) {
    (
        (lat * NODE_KEY_SCALE).round() as i64,
        (lon * NODE_KEY_SCALE).round() as i64,
    )
}

impl RoadGraph {
    pub fn from_catalog(catalog: &SegmentCatalog) -> Self {
        let mut graph = Self {
            coords: Vec::new(),
            adjacency: Vec::new(),
            segment_nodes: HashMap::with_capacity(catalog.len()),
        };
        let mut lookup: HashMap<(i64, i64), NodeId> = HashMap::new();

        let mut node_for = |graph: &mut Self, lat: f64, lon: f64| -> NodeId {
            *lookup.entry(node_key(lat, lon)).or_insert_with(|| {
                graph.coords.push((lat, lon));
                graph.adjacency.push(Vec::new());
                graph.coords.len() - 1
            })
        };

        for (position, segment) in catalog.segments().iter().enumerate() {
            let start = node_for(&mut graph, segment.start_lat, segment.start_lon);
            let end = node_for(&mut graph, segment.end_lat, segment.end_lon);
            graph.segment_nodes.insert(segment.id, (start, end));
            graph.adjacency[start].push(Edge {
                to: end,
                segment_id: segment.id,
                position,
            });
            graph.adjacency[end].push(Edge {
                to: start,
                segment_id: segment.id,
                position,
            });
        }
        graph
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn edge_count(&self) -> usize {
        self.segment_nodes.len()
    }

    pub fn coords(&self, node: NodeId) -> Option<(f64, f64)> {
        self.coords.get(node).copied()
    }

    pub fn edges(&self, node: NodeId) -> &[Edge] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn segment_nodes(&self, segment_id: SegmentId) -> Option<(NodeId, NodeId)> {
        self.segment_nodes.get(&segment_id).copied()
    }

    /// Node closest to `(lat, lon)` by flat-earth distance. Linear scan.
    pub fn nearest_node(&self, lat: f64, lon: f64) -> Option<NodeId> {
        self.coords
            .iter()
            .enumerate()
            .map(|(node, &(n_lat, n_lon))| (node, flat_distance_km(lat, lon, n_lat, n_lon)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(node, _)| node)
    }

    /// Dijkstra from `source` to `target` with per-edge costs from `edge_cost`.
    /// Stops as soon as the target is settled.
    pub fn shortest_path<F>(&self, source: NodeId, target: NodeId, mut edge_cost: F) -> Path
    where
        F: FnMut(&Edge) -> f64,
    {
        if source >= self.node_count() || target >= self.node_count() {
            return Path::unreachable();
        }
        if source == target {
            return Path {
                nodes: vec![source],
                segments: Vec::new(),
                cost: 0.0,
            };
        }

        let mut best = vec![f64::INFINITY; self.node_count()];
        let mut parent: Vec<Option<(NodeId, SegmentId)>> = vec![None; self.node_count()];
        let mut heap = BinaryHeap::new();
        best[source] = 0.0;
        heap.push(QueueEntry {
            cost: 0.0,
            node: source,
        });

        while let Some(QueueEntry { cost, node }) = heap.pop() {
            if node == target {
                break;
            }
            if cost > best[node] {
                continue;
            }
            for edge in &self.adjacency[node] {
                let next_cost = cost + edge_cost(edge);
                if next_cost < best[edge.to] {
                    best[edge.to] = next_cost;
                    parent[edge.to] = Some((node, edge.segment_id));
                    heap.push(QueueEntry {
                        cost: next_cost,
                        node: edge.to,
                    });
                }
            }
        }

        if parent[target].is_none() {
            return Path::unreachable();
        }

        let mut nodes = vec![target];
        let mut segments = Vec::new();
        let mut current = target;
        while current != source {
            let Some((prev, segment_id)) = parent[current] else {
                return Path::unreachable();
            };
            nodes.push(prev);
            segments.push(segment_id);
            current = prev;
        }
        nodes.reverse();
        segments.reverse();

        Path {
            nodes,
            segments,
            cost: best[target],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RoadType, Segment};

    fn segment(id: SegmentId, start: (f64, f64), end: (f64, f64)) -> Segment {
        Segment {
            id,
            start_lat: start.0,
            start_lon: start.1,
            end_lat: end.0,
            end_lon: end.1,
            length_km: 1.0,
            capacity: 1000,
            free_flow_speed: 60.0,
            road_type: RoadType::Trunk,
        }
    }

    /// Triangle a-b-c with a direct a-c edge, plus an isolated d-e edge.
    fn catalog() -> SegmentCatalog {
        let a = (6.5000, 3.3000);
        let b = (6.5100, 3.3000);
        let c = (6.5100, 3.3100);
        let d = (6.6000, 3.5000);
        let e = (6.6100, 3.5000);
        SegmentCatalog::new(vec![
            segment(1, a, b),
            // starts within a few metres of b
            segment(2, (6.51002, 3.30001), c),
            segment(3, a, c),
            segment(4, d, e),
        ])
        .expect("valid catalog")
    }

    #[test]
    fn endpoints_are_deduplicated() {
        let graph = RoadGraph::from_catalog(&catalog());
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), 4);
        let (_, b) = graph.segment_nodes(1).expect("segment 1");
        let (b2, _) = graph.segment_nodes(2).expect("segment 2");
        assert_eq!(b, b2);
        assert_eq!(graph.edges(b).len(), 2);
    }

    #[test]
    fn nearest_node_picks_closest() {
        let graph = RoadGraph::from_catalog(&catalog());
        let node = graph.nearest_node(6.6099, 3.5001).expect("non-empty graph");
        assert_eq!(graph.coords(node), Some((6.6100, 3.5000)));
    }

    #[test]
    fn dijkstra_prefers_cheaper_detour() {
        let graph = RoadGraph::from_catalog(&catalog());
        let (a, c) = graph.segment_nodes(3).expect("segment 3");
        let path = graph.shortest_path(a, c, |edge| if edge.segment_id == 3 { 10.0 } else { 1.0 });
        assert_eq!(path.segments, vec![1, 2]);
        assert_eq!(path.nodes.len(), 3);
        assert_eq!(path.cost, 2.0);

        let direct = graph.shortest_path(a, c, |_| 1.0);
        assert_eq!(direct.segments, vec![3]);
    }

    #[test]
    fn unreachable_and_same_node() {
        let graph = RoadGraph::from_catalog(&catalog());
        let (a, _) = graph.segment_nodes(1).expect("segment 1");
        let (d, _) = graph.segment_nodes(4).expect("segment 4");

        let none = graph.shortest_path(a, d, |_| 1.0);
        assert!(!none.is_reachable());
        assert!(none.segments.is_empty());

        let same = graph.shortest_path(a, a, |_| 1.0);
        assert_eq!(same.nodes, vec![a]);
        assert!(same.segments.is_empty());
        assert_eq!(same.cost, 0.0);
    }
}
