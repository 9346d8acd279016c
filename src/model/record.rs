//! Diagnostics records: one per run, the unit of the ledger.

use jiff::{Timestamp, civil::DateTime, tz::TimeZone};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire format for the run timestamp. Always UTC, minute resolution.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%MZ";

/// Wire format for the next startup time, which the dashboard reads with seconds.
pub const NEXT_STARTUP_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// Everything one run reports about itself.
///
/// Field names match the dashboard's column names, so the canonical
/// list-of-maps ledger can be loaded as a table without renaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsRecord {
    /// Unique per record. Legacy tabular records have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(with = "utc_minutes")]
    pub timestamp: Timestamp,

    #[serde(with = "utc_seconds")]
    pub next_startup_time: Timestamp,

    #[serde(default)]
    pub battery_voltage: Option<f64>,

    #[serde(default)]
    pub internal_voltage: Option<f64>,

    #[serde(default)]
    pub internal_current: Option<f64>,

    #[serde(default)]
    pub temperature: Option<f64>,

    /// Cellular RSSI as reported by `AT+CSQ` (0-31, 99 = unknown).
    #[serde(default)]
    pub signal_quality: Option<u8>,

    /// `-` when there was no fix, which is distinct from a fix at 0.
    #[serde(default, with = "dash")]
    pub latitude: Option<f64>,

    #[serde(default, with = "dash")]
    pub longitude: Option<f64>,

    #[serde(default, with = "dash")]
    pub height: Option<f64>,

    /// Every non-fatal failure of the run, in the order it happened.
    #[serde(default)]
    pub error: String,
}

/// Parses a UTC instant written with or without seconds.
pub fn parse_utc(text: &str) -> Result<Timestamp, jiff::Error> {
    let text = text.trim();
    let datetime = DateTime::strptime(NEXT_STARTUP_FORMAT, text)
        .or_else(|_| DateTime::strptime(TIMESTAMP_FORMAT, text))?;
    Ok(datetime.to_zoned(TimeZone::UTC)?.timestamp())
}

mod utc_minutes {
    use jiff::Timestamp;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{TIMESTAMP_FORMAT, parse_utc};

    pub fn serialize<S: Serializer>(timestamp: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&timestamp.strftime(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let text = String::deserialize(d)?;
        parse_utc(&text).map_err(D::Error::custom)
    }
}

mod utc_seconds {
    use jiff::Timestamp;
    use serde::{Deserializer, Serializer};

    use super::NEXT_STARTUP_FORMAT;

    pub fn serialize<S: Serializer>(timestamp: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&timestamp.strftime(NEXT_STARTUP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        super::utc_minutes::deserialize(d)
    }
}

mod dash {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    #[allow(clippy::ref_option)] // Signature is dictated by `serde(with)`.
    pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_f64(*v),
            None => s.serialize_str("-"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Number(v)) => Ok(Some(v)),
            Some(Raw::Text(text)) => {
                let text = text.trim();
                if text.is_empty() || text == "-" {
                    Ok(None)
                } else {
                    text.parse().map(Some).map_err(D::Error::custom)
                }
            }
        }
    }
}
