//! WittyPi power board, driven through its shell utilities.
//!
//! Readings and threshold changes call functions from `utilities.sh`.
//! Schedules are written to `schedule.wpi` and activated with `runScript.sh`,
//! whose output names the next startup time.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use jiff::{Timestamp, civil::DateTime, tz::TimeZone};

use crate::model::{MINUTES_PER_DAY, PowerState, WakeSchedule, parse_measurement};

use super::{BoardError, PowerBoard, Result};

const SCHEDULE_FILE: &str = "schedule.wpi";

/// Schedules repeat daily from this fixed date, so only the time of day matters.
const SCHEDULE_BEGIN_DATE: &str = "2020-01-01";
const SCHEDULE_END: &str = "2099-12-31 23:59:59";

/// A WittyPi board whose scripts live in `dir`.
pub struct WittyPi {
    dir: PathBuf,
    time_zone: TimeZone,
}

impl WittyPi {
    /// `time_zone` is the zone the board's clock and scripts use.
    pub fn new(dir: impl Into<PathBuf>, time_zone: TimeZone) -> Self {
        Self {
            dir: dir.into(),
            time_zone,
        }
    }

    /// Call a function from `utilities.sh` and return its stdout.
    fn utility(&self, function: &str, args: &[&str]) -> Result<String> {
        let call = std::iter::once(function)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        run(
            Command::new("bash")
                .arg("-c")
                .arg(format!(". ./utilities.sh && {call}"))
                .current_dir(&self.dir),
            function,
        )
    }

    fn reading(&self, function: &str) -> Result<f64> {
        let output = self.utility(function, &[])?;
        parse_measurement(&output).ok_or_else(|| BoardError::Reading {
            command: function.to_string(),
            output,
        })
    }

    /// A secondary reading: logged and dropped when it fails.
    fn optional_reading(&self, function: &str) -> Option<f64> {
        self.reading(function)
            .inspect_err(|e| tracing::warn!(function, error = %e, "board reading failed"))
            .ok()
    }
}

impl PowerBoard for WittyPi {
    fn read_power_state(&mut self) -> Result<PowerState> {
        let battery_voltage = self.reading("get_input_voltage")?;

        Ok(PowerState {
            battery_voltage,
            internal_voltage: self.optional_reading("get_output_voltage"),
            internal_current: self.optional_reading("get_output_current"),
            temperature: self.optional_reading("get_temperature"),
        })
    }

    fn apply_schedule(&mut self, schedule: &WakeSchedule) -> Result<Timestamp> {
        let script = render_schedule(schedule)?;
        fs::write(self.dir.join(SCHEDULE_FILE), script)?;

        let output = run(
            Command::new("sudo")
                .arg("./runScript.sh")
                .current_dir(&self.dir),
            "runScript.sh",
        )?;

        parse_next_startup(&output, &self.time_zone).ok_or_else(|| BoardError::Reading {
            command: "runScript.sh".to_string(),
            output,
        })
    }

    // The board stores thresholds in tenths of a volt.
    fn set_low_voltage_threshold(&mut self, volts: f64) -> Result<()> {
        let tenths = format!("{:.0}", volts * 10.0);
        self.utility("set_low_voltage_threshold", &[&tenths])?;
        Ok(())
    }

    fn set_recovery_voltage_threshold(&mut self, volts: f64) -> Result<()> {
        let tenths = format!("{:.0}", volts * 10.0);
        self.utility("set_recovery_voltage_threshold", &[&tenths])?;
        Ok(())
    }

    fn sync_time(&mut self) -> Result<()> {
        self.utility("net_to_system", &[])?;
        self.utility("system_to_rtc", &[])?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        run(Command::new("sudo").args(["shutdown", "-h", "now"]), "shutdown")?;
        Ok(())
    }
}

/// Run a command and return its stdout on success.
fn run(command: &mut Command, name: &str) -> Result<String> {
    let output = command.output().map_err(|source| BoardError::Spawn {
        command: name.to_string(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BoardError::Command {
            command: name.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Render wake events as a WittyPi schedule script.
///
/// Each event becomes an `ON`/`OFF` pair. The `OFF` runs until the next event,
/// and the last one wraps around to the first event of the next day.
pub fn render_schedule(schedule: &WakeSchedule) -> Result<String> {
    let Some(first) = schedule.events.first() else {
        return Err(BoardError::Schedule("no wake events".to_string()));
    };

    let minutes: Vec<u32> = schedule.events.iter().map(|e| e.minute_of_day()).collect();
    let gaps: Vec<u32> = (0..minutes.len())
        .map(|i| {
            let next = minutes[(i + 1) % minutes.len()];
            match (next + MINUTES_PER_DAY - minutes[i]) % MINUTES_PER_DAY {
                0 => MINUTES_PER_DAY,
                gap => gap,
            }
        })
        .collect();

    if gaps.iter().sum::<u32>() != MINUTES_PER_DAY {
        return Err(BoardError::Schedule(
            "wake events do not fit one daily cycle".to_string(),
        ));
    }

    let awake = schedule.awake_minutes.max(1);
    let mut script = format!(
        "# Written by fieldcam; replaced on every run.\n\
         BEGIN\t{SCHEDULE_BEGIN_DATE} {first}:00\n\
         END\t{SCHEDULE_END}\n"
    );
    for gap in gaps {
        if gap < 2 {
            return Err(BoardError::Schedule(format!(
                "{gap} min between wakes leaves no time to sleep"
            )));
        }
        let on = awake.min(gap - 1);
        script.push_str(&format!("ON\tM{on}\nOFF\tM{}\n", gap - on));
    }

    Ok(script)
}

/// Find the next startup time in `runScript.sh` output.
///
/// Example line: `Schedule next startup at: 2024-03-13 08:00:00`.
pub fn parse_next_startup(output: &str, time_zone: &TimeZone) -> Option<Timestamp> {
    let line = output
        .lines()
        .find(|line| line.to_ascii_lowercase().contains("next startup"))?;
    let start = line.find(|c: char| c.is_ascii_digit())?;
    let text = line.get(start..start + 19)?;

    let datetime = DateTime::strptime("%Y-%m-%d %H:%M:%S", text).ok()?;
    datetime
        .to_zoned(time_zone.clone())
        .ok()
        .map(|zoned| zoned.timestamp())
}
