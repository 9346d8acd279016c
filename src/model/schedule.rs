//! Wake schedule types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of one schedule cycle.
pub const MINUTES_PER_DAY: u32 = 1440;

/// A wall-clock wake time, in the device's local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub hour: u8,
    pub minute: u8,
}

impl ScheduleEvent {
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    /// Builds an event from minutes past midnight, wrapping at 24:00.
    #[allow(clippy::cast_possible_truncation)] // Bounded by the modulo below.
    pub const fn from_minute_of_day(minutes: u32) -> Self {
        let minutes = minutes % MINUTES_PER_DAY;
        Self {
            hour: (minutes / 60) as u8,
            minute: (minutes % 60) as u8,
        }
    }

    pub const fn minute_of_day(self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

impl fmt::Display for ScheduleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// The effective schedule parameters for one run.
///
/// Starts from the static settings, then the solar window and power policy
/// adjust it before it is compiled into wake events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePlan {
    pub start: ScheduleEvent,
    pub interval_minutes: u32,
    pub repetitions: u32,
}

impl SchedulePlan {
    /// Committed whenever the computed plan cannot be applied.
    pub const FALLBACK: Self = Self {
        start: ScheduleEvent::new(8, 0),
        interval_minutes: 30,
        repetitions: 8,
    };
}

impl fmt::Display for SchedulePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} every {} min, {}x per day",
            self.start, self.interval_minutes, self.repetitions
        )
    }
}

/// A compiled schedule, ready to hand to the power board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeSchedule {
    /// Wake times in firing order, starting with the plan's start time.
    pub events: Vec<ScheduleEvent>,

    /// How long the board keeps the host powered after each wake.
    pub awake_minutes: u32,
}
