//! Solar window planning: wake from sunrise to sunset.
//!
//! Sunrise and sunset come from an [`Ephemeris`]; this module only snaps them
//! onto the capture grid and decides how many wakes fit between them.

use jiff::{Timestamp, civil::Date, tz::TimeZone};

use crate::model::{MINUTES_PER_DAY, ScheduleEvent, SchedulePlan};
use crate::settings::Settings;

/// Errors from the sunrise/sunset source.
#[derive(Debug, thiserror::Error)]
pub enum EphemerisError {
    #[error("no sunrise and sunset on {date} at {latitude}, {longitude}")]
    NoSunEvent {
        date: Date,
        latitude: f64,
        longitude: f64,
    },

    #[error("invalid instant: {0}")]
    Time(#[from] jiff::Error),
}

/// Source of sunrise and sunset instants.
pub trait Ephemeris {
    /// Sunrise and sunset on `date` at the given position.
    fn sun_times(
        &self,
        date: Date,
        latitude: f64,
        longitude: f64,
    ) -> Result<(Timestamp, Timestamp), EphemerisError>;
}

/// The standard sunrise equation, via the `sunrise` crate.
pub struct SunriseEquation;

impl Ephemeris for SunriseEquation {
    fn sun_times(
        &self,
        date: Date,
        latitude: f64,
        longitude: f64,
    ) -> Result<(Timestamp, Timestamp), EphemerisError> {
        #[allow(deprecated)]
        let (rise, set) = sunrise::sunrise_sunset(
            latitude,
            longitude,
            i32::from(date.year()),
            u32::from(date.month().unsigned_abs()),
            u32::from(date.day().unsigned_abs()),
        );

        // Polar day and night come back as a degenerate window.
        if set <= rise {
            return Err(EphemerisError::NoSunEvent {
                date,
                latitude,
                longitude,
            });
        }

        Ok((Timestamp::from_second(rise)?, Timestamp::from_second(set)?))
    }
}

/// Round a wall-clock time to the nearest multiple of `interval_minutes`.
///
/// Ties round up. Rounding past 23:59 wraps to the next day's 00:00.
pub fn round_to_interval(time: ScheduleEvent, interval_minutes: u32) -> ScheduleEvent {
    if interval_minutes == 0 {
        return time;
    }
    let minutes = time.minute_of_day();
    let steps = (2 * minutes + interval_minutes) / (2 * interval_minutes);
    ScheduleEvent::from_minute_of_day(steps * interval_minutes)
}

/// How many wakes cover the window from sunrise to sunset, both ends included.
///
/// Never more than fit into one day at the given interval.
pub fn repetitions_for_window(
    sunrise: ScheduleEvent,
    sunset: ScheduleEvent,
    interval_minutes: u32,
) -> u32 {
    if interval_minutes == 0 {
        return 1;
    }
    let window = (sunset.minute_of_day() + MINUTES_PER_DAY - sunrise.minute_of_day())
        % MINUTES_PER_DAY;
    let repetitions = window.div_ceil(interval_minutes) + 1;
    repetitions.min(MINUTES_PER_DAY / interval_minutes)
}

/// A daylight window snapped to the capture grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolarWindow {
    pub sunrise: ScheduleEvent,
    pub sunset: ScheduleEvent,
    pub repetitions: u32,
}

/// Plans the day's wakes around the sun.
pub struct SolarWindowPlanner<'e> {
    ephemeris: &'e dyn Ephemeris,
    time_zone: TimeZone,
}

impl<'e> SolarWindowPlanner<'e> {
    /// `time_zone` is the zone the power board's clock runs in.
    pub fn new(ephemeris: &'e dyn Ephemeris, time_zone: TimeZone) -> Self {
        Self {
            ephemeris,
            time_zone,
        }
    }

    /// The rounded daylight window on `date`.
    pub fn window(
        &self,
        date: Date,
        latitude: f64,
        longitude: f64,
        interval_minutes: u32,
    ) -> Result<SolarWindow, EphemerisError> {
        let (rise, set) = self.ephemeris.sun_times(date, latitude, longitude)?;
        let sunrise = round_to_interval(self.wall_clock(rise), interval_minutes);
        let sunset = round_to_interval(self.wall_clock(set), interval_minutes);

        Ok(SolarWindow {
            sunrise,
            sunset,
            repetitions: repetitions_for_window(sunrise, sunset, interval_minutes),
        })
    }

    /// The plan for `date`: the solar window when enabled and located,
    /// otherwise the static schedule from the settings.
    pub fn plan(&self, settings: &Settings, date: Date) -> Result<SchedulePlan, EphemerisError> {
        let plan = settings.static_plan();
        if !settings.enable_sunrise_sunset || !settings.has_location() {
            return Ok(plan);
        }

        let window = self.window(
            date,
            settings.latitude,
            settings.longitude,
            settings.interval_minutes,
        )?;
        tracing::debug!(
            sunrise = %window.sunrise,
            sunset = %window.sunset,
            repetitions = window.repetitions,
            "solar window"
        );

        Ok(SchedulePlan {
            start: window.sunrise,
            repetitions: window.repetitions,
            ..plan
        })
    }

    fn wall_clock(&self, instant: Timestamp) -> ScheduleEvent {
        let time = instant.to_zoned(self.time_zone.clone()).time();
        ScheduleEvent::new(time.hour().unsigned_abs(), time.minute().unsigned_abs())
    }
}
