//! Segment catalog: the immutable list of road segments the simulation runs on.
//!
//! The catalog is produced once at startup by a synthetic generator and never
//! mutated afterwards; engines share it behind an `Arc`.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::TrafficError;

pub type SegmentId = u32;

/// Mean Earth radius used by the flat-earth distance approximation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default network centre (Lagos).
pub const DEFAULT_CENTER: (f64, f64) = (6.5244, 3.3792);

/// Shortest length assigned to a generated segment.
const MIN_SEGMENT_LENGTH_KM: f64 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadType {
    Motorway,
    Trunk,
    Primary,
    Secondary,
    Tertiary,
}

impl RoadType {
    pub const ALL: [RoadType; 5] = [
        RoadType::Motorway,
        RoadType::Trunk,
        RoadType::Primary,
        RoadType::Secondary,
        RoadType::Tertiary,
    ];

    /// Inclusive capacity range in vehicles.
    pub fn capacity_range(self) -> (u32, u32) {
        match self {
            RoadType::Motorway => (2000, 2800),
            RoadType::Trunk => (1500, 2200),
            RoadType::Primary => (1000, 1600),
            RoadType::Secondary => (700, 1200),
            RoadType::Tertiary => (400, 900),
        }
    }

    /// Free-flow speed in km/h.
    pub fn free_flow_speed(self) -> f64 {
        match self {
            RoadType::Motorway => 70.0,
            RoadType::Trunk => 60.0,
            RoadType::Primary => 50.0,
            RoadType::Secondary => 40.0,
            RoadType::Tertiary => 30.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoadType::Motorway => "motorway",
            RoadType::Trunk => "trunk",
            RoadType::Primary => "primary",
            RoadType::Secondary => "secondary",
            RoadType::Tertiary => "tertiary",
        }
    }
}

impl fmt::Display for RoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stretch of road. Immutable after generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub start_lat: f64,
    pub start_lon: f64,
    pub end_lat: f64,
    pub end_lon: f64,
    pub length_km: f64,
    pub capacity: u32,
    /// km/h
    pub free_flow_speed: f64,
    pub road_type: RoadType,
}

impl Segment {
    /// `[[start_lat, start_lon], [end_lat, end_lon]]`
    pub fn geometry(&self) -> [[f64; 2]; 2] {
        [
            [self.start_lat, self.start_lon],
            [self.end_lat, self.end_lon],
        ]
    }
}

/// Equirectangular distance in km. Adequate at city scale.
pub fn flat_distance_km(a_lat: f64, a_lon: f64, b_lat: f64, b_lon: f64) -> f64 {
    let x = (b_lon - a_lon).to_radians() * ((a_lat + b_lat) / 2.0).to_radians().cos();
    let y = (b_lat - a_lat).to_radians();
    (x * x + y * y).sqrt() * EARTH_RADIUS_KM
}

/// Validated, id-indexed segment list.
#[derive(Debug, Clone)]
pub struct SegmentCatalog {
    segments: Vec<Segment>,
    index: HashMap<SegmentId, usize>,
    total_capacity: u64,
}

impl SegmentCatalog {
    /// Build a catalog, rejecting duplicate or zero ids and non-positive
    /// length, capacity or free-flow speed.
    pub fn new(segments: Vec<Segment>) -> Result<Self, TrafficError> {
        let mut index = HashMap::with_capacity(segments.len());
        for (position, segment) in segments.iter().enumerate() {
            if segment.id == 0 {
                return Err(TrafficError::Catalog("segment ids must be >= 1".into()));
            }
            if !(segment.length_km > 0.0) {
                return Err(TrafficError::Catalog(format!(
                    "segment {} has non-positive length",
                    segment.id
                )));
            }
            if segment.capacity == 0 {
                return Err(TrafficError::Catalog(format!(
                    "segment {} has zero capacity",
                    segment.id
                )));
            }
            if !(segment.free_flow_speed > 0.0) {
                return Err(TrafficError::Catalog(format!(
                    "segment {} has non-positive free-flow speed",
                    segment.id
                )));
            }
            if index.insert(segment.id, position).is_some() {
                return Err(TrafficError::Catalog(format!(
                    "duplicate segment id {}",
                    segment.id
                )));
            }
        }
        let total_capacity = segments.iter().map(|s| u64::from(s.capacity)).sum();
        Ok(Self {
            segments,
            index,
            total_capacity,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.index.get(&id).map(|&i| &self.segments[i])
    }

    /// Position of `id` in [`Self::segments`].
    pub fn position(&self, id: SegmentId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn total_capacity(&self) -> u64 {
        self.total_capacity
    }
}

/// Layout produced by the synthetic generator.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkLayout {
    /// Short segments scattered at random around the centre.
    #[default]
    Scatter,
    /// A connected square lattice of two-way streets around the centre.
    Grid,
}

/// Generate `num_segments` segments with the given layout. Reproducible for a seed.
pub fn generate_segments(layout: NetworkLayout, num_segments: usize, seed: u64) -> Vec<Segment> {
    match layout {
        NetworkLayout::Scatter => generate_scatter_segments(num_segments, seed, DEFAULT_CENTER),
        NetworkLayout::Grid => generate_grid_segments(num_segments, seed, DEFAULT_CENTER),
    }
}

fn random_road(rng: &mut StdRng) -> (RoadType, u32, f64) {
    let road_type = RoadType::ALL[rng.gen_range(0..RoadType::ALL.len())];
    let (low, high) = road_type.capacity_range();
    (road_type, rng.gen_range(low..=high), road_type.free_flow_speed())
}

#[allow(clippy::too_many_arguments)]
fn build_segment(
    id: SegmentId,
    start_lat: f64,
    start_lon: f64,
    end_lat: f64,
    end_lon: f64,
    road_type: RoadType,
    capacity: u32,
    free_flow_speed: f64,
) -> Segment {
    let length_km =
        flat_distance_km(start_lat, start_lon, end_lat, end_lon).max(MIN_SEGMENT_LENGTH_KM);
    Segment {
        id,
        start_lat,
        start_lon,
        end_lat,
        end_lon,
        length_km,
        capacity,
        free_flow_speed,
        road_type,
    }
}

/// Random short segments within 0.18 degrees of `center`.
pub fn generate_scatter_segments(num_segments: usize, seed: u64, center: (f64, f64)) -> Vec<Segment> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (center_lat, center_lon) = center;

    (1..=num_segments as SegmentId)
        .map(|id| {
            let theta = rng.gen_range(0.0..2.0 * PI);
            let radius = rng.gen_range(0.0..0.18);
            let start_lat = center_lat + radius * theta.cos();
            let start_lon = center_lon + radius * theta.sin();

            let direction = rng.gen_range(0.0..2.0 * PI);
            let edge_len = rng.gen_range(0.001..0.007);
            let end_lat = start_lat + edge_len * direction.cos();
            let end_lon = start_lon + edge_len * direction.sin();

            let (road_type, capacity, ffs) = random_road(&mut rng);
            build_segment(id, start_lat, start_lon, end_lat, end_lon, road_type, capacity, ffs)
        })
        .collect()
}

/// Grid spacing in degrees (~550 m).
const GRID_STEP_DEG: f64 = 0.005;

/// Square lattice around `center`, edges emitted row by row until
/// `num_segments` are produced. Every prefix of the edge order is connected.
pub fn generate_grid_segments(num_segments: usize, seed: u64, center: (f64, f64)) -> Vec<Segment> {
    let mut rng = StdRng::seed_from_u64(seed);
    // Smallest side with enough edges: an n x n lattice has 2n(n-1) edges.
    let mut side = 2usize;
    while 2 * side * (side - 1) < num_segments {
        side += 1;
    }
    let origin_lat = center.0 - GRID_STEP_DEG * (side - 1) as f64 / 2.0;
    let origin_lon = center.1 - GRID_STEP_DEG * (side - 1) as f64 / 2.0;
    let coord = |row: usize, col: usize| {
        (
            origin_lat + GRID_STEP_DEG * row as f64,
            origin_lon + GRID_STEP_DEG * col as f64,
        )
    };

    let mut segments = Vec::with_capacity(num_segments);
    'rows: for row in 0..side {
        for col in 0..side {
            let (lat, lon) = coord(row, col);
            let mut neighbours = Vec::with_capacity(2);
            if col + 1 < side {
                neighbours.push(coord(row, col + 1));
            }
            if row + 1 < side {
                neighbours.push(coord(row + 1, col));
            }
            for (end_lat, end_lon) in neighbours {
                if segments.len() == num_segments {
                    break 'rows;
                }
                let (road_type, capacity, ffs) = random_road(&mut rng);
                let id = segments.len() as SegmentId + 1;
                segments.push(build_segment(id, lat, lon, end_lat, end_lon, road_type, capacity, ffs));
            }
        }
    }
    segments
}
