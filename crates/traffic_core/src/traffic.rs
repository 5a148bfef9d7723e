//! Demand model: scenario-specific time-of-day profiles and weekend damping.
//!
//! Each scenario expands into 24 hourly demand factors. The simulation reads
//! the factor for the clock's hour, applies the weekend factor and floors the
//! result before scaling it by the operator's demand multiplier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrafficError;

/// Lower bound of the scenario/time demand factor.
pub const MIN_DEMAND_FACTOR: f64 = 0.45;

/// Demand damping on Saturday and Sunday.
pub const WEEKEND_FACTOR: f64 = 0.9;

pub const PEAK_BONUS: f64 = 0.18;
pub const NIGHT_PENALTY: f64 = 0.12;

/// Operator-controlled range for the demand multiplier.
pub const DEMAND_MULTIPLIER_RANGE: (f64, f64) = (0.2, 2.5);

/// Named demand scenario.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Scenario {
    Morning,
    #[default]
    Midday,
    Evening,
    Night,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Morning,
        Scenario::Midday,
        Scenario::Evening,
        Scenario::Night,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Morning => "Morning",
            Scenario::Midday => "Midday",
            Scenario::Evening => "Evening",
            Scenario::Night => "Night",
        }
    }

    fn base(self) -> f64 {
        match self {
            Scenario::Morning => 1.15,
            Scenario::Midday => 1.0,
            Scenario::Evening => 1.2,
            Scenario::Night => 0.75,
        }
    }

    fn peak_hours(self) -> &'static [usize] {
        match self {
            Scenario::Morning => &[6, 7, 8, 9],
            Scenario::Midday => &[11, 12, 13, 14],
            Scenario::Evening => &[16, 17, 18, 19],
            Scenario::Night => &[21, 22, 23, 0, 1, 2, 3, 4],
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = TrafficError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| {
                TrafficError::validation(
                    "scenario",
                    format!("{s:?} is not one of Morning, Midday, Evening, Night"),
                )
            })
    }
}

/// Hourly demand factors for one scenario.
#[derive(Clone, Debug, PartialEq)]
pub struct DemandProfile {
    /// Factor for each hour of the day (0–23), before weekend damping.
    pub hourly_factors: [f64; 24],
}

impl DemandProfile {
    /// Peak hours get the scenario base plus [`PEAK_BONUS`]; other hours in
    /// 0–4 get the base minus [`NIGHT_PENALTY`].
    pub fn for_scenario(scenario: Scenario) -> Self {
        let mut hourly_factors = [scenario.base(); 24];
        for (hour, factor) in hourly_factors.iter_mut().enumerate() {
            if scenario.peak_hours().contains(&hour) {
                *factor += PEAK_BONUS;
            } else if hour <= 4 {
                *factor -= NIGHT_PENALTY;
            }
        }
        Self { hourly_factors }
    }

    /// Floored demand factor for an hour and weekday (`0 = Monday`).
    pub fn factor_at(&self, hour: u32, day_of_week: u8) -> f64 {
        let time_factor = self.hourly_factors[(hour % 24) as usize];
        let day_factor = if day_of_week >= 5 { WEEKEND_FACTOR } else { 1.0 };
        (time_factor * day_factor).max(MIN_DEMAND_FACTOR)
    }
}

/// Demand factor that drives inflow for one tick.
pub fn demand_factor(scenario: Scenario, hour: u32, day_of_week: u8, demand_multiplier: f64) -> f64 {
    DemandProfile::for_scenario(scenario).factor_at(hour, day_of_week) * demand_multiplier
}

pub fn clamp_demand_multiplier(multiplier: f64) -> f64 {
    let (low, high) = DEMAND_MULTIPLIER_RANGE;
    if multiplier.is_nan() {
        return 1.0;
    }
    multiplier.clamp(low, high)
}
