//! Errors surfaced by the traffic core to its callers.
//!
//! Cache failures never appear here: the cache absorbs them and falls back to
//! process-local storage. Retrain failures are not errors either; see
//! [`crate::prediction::RetrainOutcome`].

use thiserror::Error;

use crate::catalog::SegmentId;

/// Boundary-facing error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrafficError {
    /// Out-of-range or malformed input. Rejected before any state changes.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The segment id is not part of the catalog.
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),

    /// No path connects the resolved origin and destination nodes.
    #[error("no route found for the given coordinates")]
    RouteNotFound,

    /// The segment list handed to the catalog violates its invariants.
    #[error("invalid segment catalog: {0}")]
    Catalog(String),
}

impl TrafficError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SegmentNotFound(_) | Self::RouteNotFound)
    }
}
