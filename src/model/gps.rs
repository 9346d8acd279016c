//! GPS fixes.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A position fix in decimal degrees. South and west are negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub height_meters: f64,

    /// UTC time reported by the receiver, when it sent a parseable one.
    pub timestamp: Option<Timestamp>,
}
