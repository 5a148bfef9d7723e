//! Simulated wall clock and its speed control.
//!
//! The clock advances by `tick_interval × speed` per tick and can be realigned
//! to a requested weekday and minute of day. Weekdays follow the
//! `0 = Monday .. 6 = Sunday` convention.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrafficError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Playback speed of the simulated clock. Only four speeds are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub enum SpeedMultiplier {
    Half,
    #[default]
    Normal,
    Double,
    Fivefold,
}

impl SpeedMultiplier {
    pub fn factor(self) -> f64 {
        match self {
            SpeedMultiplier::Half => 0.5,
            SpeedMultiplier::Normal => 1.0,
            SpeedMultiplier::Double => 2.0,
            SpeedMultiplier::Fivefold => 5.0,
        }
    }
}

impl TryFrom<f64> for SpeedMultiplier {
    type Error = TrafficError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        [
            SpeedMultiplier::Half,
            SpeedMultiplier::Normal,
            SpeedMultiplier::Double,
            SpeedMultiplier::Fivefold,
        ]
        .into_iter()
        .find(|speed| speed.factor() == value)
        .ok_or_else(|| {
            TrafficError::validation("speed_multiplier", format!("{value} is not one of 0.5, 1, 2, 5"))
        })
    }
}

impl From<SpeedMultiplier> for f64 {
    fn from(speed: SpeedMultiplier) -> f64 {
        speed.factor()
    }
}

impl fmt::Display for SpeedMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

/// Simulated UTC clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    now: DateTime<Utc>,
}

impl SimulationClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Advance by `interval_secs × speed`, at millisecond resolution.
    pub fn advance(&mut self, interval_secs: f64, speed: SpeedMultiplier) {
        let millis = (interval_secs * speed.factor() * 1000.0).round() as i64;
        self.now += Duration::milliseconds(millis);
    }

    pub fn hour(&self) -> u32 {
        self.now.hour()
    }

    /// `0 = Monday .. 6 = Sunday`
    pub fn weekday(&self) -> u8 {
        self.now.weekday().num_days_from_monday() as u8
    }

    pub fn minute_of_day(&self) -> u32 {
        self.now.hour() * 60 + self.now.minute()
    }

    /// Move forward (0-6 days) to midnight of `day_of_week`.
    pub fn align_to_weekday(&mut self, day_of_week: u8) {
        let day = i64::from(day_of_week.min(6));
        let delta_days = (day - i64::from(self.weekday())).rem_euclid(7);
        let midnight = self.now.date_naive().and_time(NaiveTime::default());
        self.now = Utc.from_utc_datetime(&midnight) + Duration::days(delta_days);
    }

    /// Realign to `day_of_week` and then set the minute of day (clamped to 0..=1439).
    pub fn align_to(&mut self, day_of_week: u8, minute_of_day: u32) {
        self.align_to_weekday(day_of_week);
        let minute = minute_of_day.min(MINUTES_PER_DAY - 1);
        self.now += Duration::minutes(i64::from(minute));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wednesday_noon() -> DateTime<Utc> {
        // 2024-01-03 was a Wednesday.
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 30, 15).single().expect("valid date")
    }

    #[test]
    fn advance_scales_with_speed() {
        let mut clock = SimulationClock::starting_at(wednesday_noon());
        clock.advance(1.0, SpeedMultiplier::Fivefold);
        assert_eq!(clock.now() - wednesday_noon(), Duration::seconds(5));
        clock.advance(1.0, SpeedMultiplier::Half);
        assert_eq!(clock.now() - wednesday_noon(), Duration::milliseconds(5500));
    }

    #[test]
    fn align_moves_forward_only() {
        let mut clock = SimulationClock::starting_at(wednesday_noon());
        assert_eq!(clock.weekday(), 2);

        clock.align_to(0, 8 * 60 + 15);
        assert_eq!(clock.weekday(), 0);
        assert_eq!(clock.minute_of_day(), 8 * 60 + 15);
        assert!(clock.now() > wednesday_noon());
        assert_eq!(clock.now().day(), 8);
    }

    #[test]
    fn align_same_day_goes_to_midnight() {
        let mut clock = SimulationClock::starting_at(wednesday_noon());
        clock.align_to_weekday(2);
        assert_eq!(clock.now().day(), 3);
        assert_eq!(clock.minute_of_day(), 0);
    }

    #[test]
    fn align_clamps_minute() {
        let mut clock = SimulationClock::starting_at(wednesday_noon());
        clock.align_to(2, 5000);
        assert_eq!(clock.minute_of_day(), MINUTES_PER_DAY - 1);
    }

    #[test]
    fn speed_multiplier_rejects_unknown_values() {
        assert_eq!(SpeedMultiplier::try_from(2.0), Ok(SpeedMultiplier::Double));
        assert_eq!(SpeedMultiplier::try_from(0.5), Ok(SpeedMultiplier::Half));
        assert!(SpeedMultiplier::try_from(3.0).is_err());
        assert!(SpeedMultiplier::try_from(f64::NAN).is_err());
    }

    #[test]
    fn speed_multiplier_serializes_as_number() {
        let json = serde_json::to_string(&SpeedMultiplier::Fivefold).expect("serialize");
        assert_eq!(json, "5.0");
        let parsed: SpeedMultiplier = serde_json::from_str("0.5").expect("deserialize");
        assert_eq!(parsed, SpeedMultiplier::Half);
        assert!(serde_json::from_str::<SpeedMultiplier>("4.0").is_err());
    }
}
