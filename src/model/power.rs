//! Power board readings.

use serde::{Deserialize, Serialize};

/// A snapshot of what the power board measured at the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    /// Battery (board input) voltage in volts.
    pub battery_voltage: f64,

    /// Voltage supplied to the host, in volts.
    pub internal_voltage: Option<f64>,

    /// Current drawn by the host, in amperes.
    pub internal_current: Option<f64>,

    /// Board temperature in degrees Celsius.
    pub temperature: Option<f64>,
}

/// Parse a measurement printed with an optional unit suffix.
///
/// Accepts `3.95`, `3.95V`, `0.42A`, and `23.5°C / 74.3°F` (first value wins).
pub fn parse_measurement(text: &str) -> Option<f64> {
    let token = text.split_whitespace().next()?;
    token
        .trim_end_matches(|c: char| !(c.is_ascii_digit() || c == '.'))
        .parse()
        .ok()
}
