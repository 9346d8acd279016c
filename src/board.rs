//! The power board: battery readings, wake scheduling, and host power.
//!
//! The controller only talks to the board through [`PowerBoard`]. The one
//! real implementation drives the WittyPi utility scripts.

mod witty_pi;

use std::io;

use jiff::Timestamp;

use crate::model::{PowerState, WakeSchedule};

pub use witty_pi::WittyPi;

/// Errors reported by the power board.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected output from {command}: {output:?}")]
    Reading { command: String, output: String },

    #[error("cannot render schedule: {0}")]
    Schedule(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, BoardError>;

/// Operations the controller needs from the power board.
pub trait PowerBoard {
    /// Read battery, output, and temperature measurements.
    fn read_power_state(&mut self) -> Result<PowerState>;

    /// Battery voltage alone.
    fn read_battery_voltage(&mut self) -> Result<f64> {
        Ok(self.read_power_state()?.battery_voltage)
    }

    /// Replace the board's wake schedule and return its next wake instant.
    fn apply_schedule(&mut self, schedule: &WakeSchedule) -> Result<Timestamp>;

    /// Voltage below which the board cuts host power.
    fn set_low_voltage_threshold(&mut self, volts: f64) -> Result<()>;

    /// Voltage above which the board restores host power.
    fn set_recovery_voltage_threshold(&mut self, volts: f64) -> Result<()>;

    /// Set the board's clock from network time.
    fn sync_time(&mut self) -> Result<()>;

    /// Power the host down. The board wakes it at the next scheduled time.
    fn shutdown(&mut self) -> Result<()>;
}
