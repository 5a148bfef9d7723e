//! Feature builder: turns a segment's rolling congestion history and current
//! state into the fixed 11-value vector the prediction engine learns from.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::buffer::BoundedFifo;

pub const FEATURE_COUNT: usize = 11;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hour",
    "day_of_week",
    "lag_1",
    "lag_3",
    "lag_6",
    "rolling_mean_15",
    "rolling_mean_60",
    "rolling_std_15",
    "capacity_ratio",
    "incident_flag",
    "rush_hour",
];

const RUSH_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];

/// Dense feature vector in [`FEATURE_NAMES`] order.
pub type FeatureVector = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub hour: f64,
    pub day_of_week: f64,
    pub lag_1: f64,
    pub lag_3: f64,
    pub lag_6: f64,
    pub rolling_mean_15: f64,
    pub rolling_mean_60: f64,
    pub rolling_std_15: f64,
    pub capacity_ratio: f64,
    pub incident_flag: f64,
    pub rush_hour: f64,
}

impl FeatureRow {
    pub fn to_vector(&self) -> FeatureVector {
        [
            self.hour,
            self.day_of_week,
            self.lag_1,
            self.lag_3,
            self.lag_6,
            self.rolling_mean_15,
            self.rolling_mean_60,
            self.rolling_std_15,
            self.capacity_ratio,
            self.incident_flag,
            self.rush_hour,
        ]
    }

    /// Stand-in vector built from a single congestion reading, used when no
    /// history lookup is wanted (predicted-mode routing costs).
    pub fn from_current(congestion_index: f64, capacity_ratio: f64, incident_flag: u8) -> Self {
        Self {
            hour: 0.0,
            day_of_week: 0.0,
            lag_1: congestion_index,
            lag_3: congestion_index,
            lag_6: congestion_index,
            rolling_mean_15: congestion_index,
            rolling_mean_60: congestion_index,
            rolling_std_15: 0.03,
            capacity_ratio,
            incident_flag: f64::from(incident_flag),
            rush_hour: 0.0,
        }
    }
}

/// Current observation of one segment, as seen by the feature builder.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSnapshot {
    pub timestamp: DateTime<Utc>,
    pub capacity: u32,
    pub vehicle_count: u64,
    pub incident_flag: u8,
}

/// k-th newest value, else the newest, else 0.
fn lag(history: &BoundedFifo<f64>, k: usize) -> f64 {
    history
        .nth_from_end(k)
        .or_else(|| history.last())
        .copied()
        .unwrap_or(0.0)
}

fn window(history: &BoundedFifo<f64>, n: usize) -> Vec<f64> {
    if history.is_empty() {
        return vec![0.0];
    }
    history.tail(n).copied().collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for fewer than two values.
fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn is_rush_hour(hour: u32) -> bool {
    RUSH_HOURS.contains(&hour)
}

/// Build the feature row for one segment.
pub fn build_feature_row(snapshot: &SegmentSnapshot, history: &BoundedFifo<f64>) -> FeatureRow {
    let window_15 = window(history, 15);
    let window_60 = window(history, 60);
    let hour = snapshot.timestamp.hour();

    FeatureRow {
        hour: f64::from(hour),
        day_of_week: f64::from(snapshot.timestamp.weekday().num_days_from_monday()),
        lag_1: lag(history, 1),
        lag_3: lag(history, 3),
        lag_6: lag(history, 6),
        rolling_mean_15: mean(&window_15),
        rolling_mean_60: mean(&window_60),
        rolling_std_15: population_std(&window_15),
        capacity_ratio: snapshot.vehicle_count as f64 / f64::from(snapshot.capacity.max(1)),
        incident_flag: f64::from(snapshot.incident_flag),
        rush_hour: if is_rush_hour(hour) { 1.0 } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(hour: u32) -> SegmentSnapshot {
        SegmentSnapshot {
            // 2024-01-06 was a Saturday.
            timestamp: Utc
                .with_ymd_and_hms(2024, 1, 6, hour, 0, 0)
                .single()
                .expect("valid date"),
            capacity: 1000,
            vehicle_count: 250,
            incident_flag: 1,
        }
    }

    fn history(values: &[f64]) -> BoundedFifo<f64> {
        let mut fifo = BoundedFifo::new(3600);
        fifo.extend(values.iter().copied());
        fifo
    }

    #[test]
    fn empty_history_defaults_to_zero() {
        let row = build_feature_row(&snapshot(3), &history(&[]));
        assert_eq!(row.lag_1, 0.0);
        assert_eq!(row.lag_6, 0.0);
        assert_eq!(row.rolling_mean_15, 0.0);
        assert_eq!(row.rolling_std_15, 0.0);
        assert_eq!(row.day_of_week, 5.0);
        assert_eq!(row.capacity_ratio, 0.25);
        assert_eq!(row.incident_flag, 1.0);
        assert_eq!(row.rush_hour, 0.0);
    }

    #[test]
    fn short_history_falls_back_to_newest() {
        let row = build_feature_row(&snapshot(8), &history(&[0.1, 0.2]));
        assert_eq!(row.lag_1, 0.2);
        assert_eq!(row.lag_3, 0.2);
        assert_eq!(row.lag_6, 0.2);
        assert!((row.rolling_mean_15 - 0.15).abs() < 1e-12);
        assert!((row.rolling_std_15 - 0.05).abs() < 1e-12);
        assert_eq!(row.rush_hour, 1.0);
    }

    #[test]
    fn windows_use_newest_values() {
        let values: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let row = build_feature_row(&snapshot(12), &history(&values));
        assert_eq!(row.lag_1, 0.99);
        assert_eq!(row.lag_3, 0.97);
        assert_eq!(row.lag_6, 0.94);
        // mean of 0.85..=0.99
        assert!((row.rolling_mean_15 - 0.92).abs() < 1e-9);
        // mean of 0.40..=0.99
        assert!((row.rolling_mean_60 - 0.695).abs() < 1e-9);
    }

    #[test]
    fn vector_order_matches_names() {
        let row = build_feature_row(&snapshot(17), &history(&[0.3]));
        let v = row.to_vector();
        assert_eq!(v[0], 17.0);
        assert_eq!(v[2], row.lag_1);
        assert_eq!(v[5], row.rolling_mean_15);
        assert_eq!(v[10], 1.0);
        assert_eq!(FEATURE_NAMES[5], "rolling_mean_15");
    }

    #[test]
    fn stand_in_row_uses_current_congestion() {
        let row = FeatureRow::from_current(0.4, 0.5, 0);
        assert_eq!(row.lag_1, 0.4);
        assert_eq!(row.rolling_mean_60, 0.4);
        assert_eq!(row.rolling_std_15, 0.03);
        assert_eq!(row.capacity_ratio, 0.5);
    }
}
