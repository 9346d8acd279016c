//! Power survival policy: wake less often as the battery drains.
//!
//! Three tiers, evaluated top-down with no hysteresis band:
//!
//! - below half charge: degraded, half as many wakes at twice the interval,
//!   with the interval capped so the wakes still fit in one day
//! - at or below the quarter threshold: survival, a single wake per day
//! - otherwise: nominal, the plan passes through unchanged

use std::fmt;

use crate::model::{MINUTES_PER_DAY, SchedulePlan};
use crate::settings::Settings;

/// Which tier the battery voltage falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Nominal,
    Degraded,
    Survival,
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nominal => "nominal",
            Self::Degraded => "degraded",
            Self::Survival => "survival",
        };
        f.write_str(name)
    }
}

/// Voltage thresholds for the power tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSurvivalPolicy {
    /// Battery voltage at half charge.
    pub battery_voltage_half: f64,

    /// Voltage at which the board cuts power.
    pub low_voltage_threshold: f64,
}

impl PowerSurvivalPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            battery_voltage_half: settings.battery_voltage_half,
            low_voltage_threshold: settings.low_voltage_threshold,
        }
    }

    /// Halfway between half charge and the cutoff.
    pub fn quarter_threshold(&self) -> f64 {
        self.battery_voltage_half - (self.battery_voltage_half - self.low_voltage_threshold) * 0.5
    }

    /// The tier for a battery voltage.
    ///
    /// Thresholds with the half-charge voltage at or below the cutoff describe
    /// no usable band, so they never leave nominal.
    pub fn mode(&self, battery_voltage: f64) -> PowerMode {
        if self.battery_voltage_half <= self.low_voltage_threshold {
            return PowerMode::Nominal;
        }
        let quarter = self.quarter_threshold();
        if quarter < battery_voltage && battery_voltage < self.battery_voltage_half {
            PowerMode::Degraded
        } else if battery_voltage <= quarter {
            PowerMode::Survival
        } else {
            PowerMode::Nominal
        }
    }

    /// Adjust a plan for the measured battery voltage.
    ///
    /// An unknown voltage leaves the plan unchanged.
    pub fn apply(&self, plan: SchedulePlan, battery_voltage: Option<f64>) -> (SchedulePlan, PowerMode) {
        let Some(voltage) = battery_voltage else {
            return (plan, PowerMode::Nominal);
        };

        let mode = self.mode(voltage);
        let adjusted = match mode {
            PowerMode::Nominal => plan,
            PowerMode::Degraded => {
                let repetitions = (plan.repetitions / 2).max(1);
                SchedulePlan {
                    interval_minutes: (plan.interval_minutes * 2).min(MINUTES_PER_DAY / repetitions),
                    repetitions,
                    ..plan
                }
            }
            PowerMode::Survival => SchedulePlan {
                repetitions: 1,
                ..plan
            },
        };

        if mode != PowerMode::Nominal {
            tracing::info!(%mode, voltage, plan = %adjusted, "power policy reduced schedule");
        }
        (adjusted, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::ScheduleEvent;

    fn policy() -> PowerSurvivalPolicy {
        PowerSurvivalPolicy {
            battery_voltage_half: 3.7,
            low_voltage_threshold: 3.0,
        }
    }

    fn plan() -> SchedulePlan {
        SchedulePlan {
            start: ScheduleEvent::new(7, 0),
            interval_minutes: 30,
            repetitions: 8,
        }
    }

    #[test]
    fn quarter_threshold_is_midway_to_cutoff() {
        assert!((policy().quarter_threshold() - 3.35).abs() < 1e-9);
    }

    #[test]
    fn degraded_doubles_interval_and_halves_repetitions() {
        let (adjusted, mode) = policy().apply(plan(), Some(3.5));

        assert_eq!(mode, PowerMode::Degraded);
        assert_eq!(adjusted.interval_minutes, 60);
        assert_eq!(adjusted.repetitions, 4);
        assert_eq!(adjusted.start, plan().start);
    }

    #[test]
    fn survival_wakes_once() {
        let (adjusted, mode) = policy().apply(plan(), Some(3.2));

        assert_eq!(mode, PowerMode::Survival);
        assert_eq!(adjusted.repetitions, 1);
        assert_eq!(adjusted.interval_minutes, 30);
    }

    #[test]
    fn exactly_half_charge_is_nominal() {
        let (adjusted, mode) = policy().apply(plan(), Some(3.7));

        assert_eq!(mode, PowerMode::Nominal);
        assert_eq!(adjusted, plan());
    }

    #[test]
    fn quarter_threshold_itself_is_survival() {
        let policy = PowerSurvivalPolicy {
            battery_voltage_half: 4.0,
            low_voltage_threshold: 3.0,
        };
        assert_eq!(policy.mode(3.5), PowerMode::Survival);
    }

    #[test]
    fn unknown_voltage_is_nominal() {
        let (adjusted, mode) = policy().apply(plan(), None);

        assert_eq!(mode, PowerMode::Nominal);
        assert_eq!(adjusted, plan());
    }

    #[test]
    fn degraded_keeps_at_least_one_wake() {
        let single = SchedulePlan {
            repetitions: 1,
            ..plan()
        };
        let (adjusted, _) = policy().apply(single, Some(3.5));
        assert_eq!(adjusted.repetitions, 1);
    }

    #[test]
    fn degraded_interval_never_exceeds_a_day() {
        let sparse = SchedulePlan {
            interval_minutes: 800,
            repetitions: 1,
            ..plan()
        };
        let (adjusted, mode) = policy().apply(sparse, Some(3.5));

        assert_eq!(mode, PowerMode::Degraded);
        assert_eq!(adjusted.repetitions, 1);
        assert_eq!(adjusted.interval_minutes, MINUTES_PER_DAY);

        let wide = SchedulePlan {
            interval_minutes: 500,
            repetitions: 2,
            ..plan()
        };
        let (adjusted, _) = policy().apply(wide, Some(3.5));
        assert_eq!(adjusted.interval_minutes, MINUTES_PER_DAY);
        assert_eq!(adjusted.repetitions, 1);
    }

    #[test]
    fn degenerate_thresholds_stay_nominal() {
        let policy = PowerSurvivalPolicy {
            battery_voltage_half: 3.0,
            low_voltage_threshold: 3.0,
        };
        assert_eq!(policy.mode(2.5), PowerMode::Nominal);
    }
}
