pub mod buffer;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod congestion;
pub mod error;
pub mod features;
pub mod platform;
pub mod prediction;
pub mod routing;
pub mod scheduler;
pub mod service;
pub mod simulation;
pub mod snapshot;
pub mod traffic;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
