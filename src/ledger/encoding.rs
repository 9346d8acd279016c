//! On-disk encodings of the remote ledger.
//!
//! Older cameras wrote a flat CSV table with unit-suffixed values. The
//! current form is a YAML list of maps. Both decode into
//! [`DiagnosticsRecord`]; only the list-of-maps form is ever written.

use winnow::ascii::line_ending;
use winnow::combinator::{alt, delimited, repeat, separated};
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::{none_of, take_till};

use crate::model::{DiagnosticsRecord, parse_measurement, parse_utc};

use super::{LedgerError, Result};

/// A decoded ledger file, tagged with the encoding it was read from.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerDocument {
    /// Legacy CSV rows.
    Tabular(Vec<DiagnosticsRecord>),

    /// YAML list of maps.
    Mapped(Vec<DiagnosticsRecord>),
}

impl LedgerDocument {
    /// Decode either encoding, telling them apart by the first non-blank line.
    pub fn decode(text: &str) -> Result<Self> {
        let first = text.lines().map(str::trim).find(|line| !line.is_empty());
        match first {
            Some(line) if !(line.starts_with('-') || line.starts_with('[')) => {
                Ok(Self::Tabular(decode_tabular(text)?))
            }
            _ => Ok(Self::Mapped(decode_mapped(text)?)),
        }
    }

    pub fn into_records(self) -> Vec<DiagnosticsRecord> {
        match self {
            Self::Tabular(records) | Self::Mapped(records) => records,
        }
    }
}

/// Encode records as YAML list items.
///
/// The output of two calls can be concatenated into one valid list, which is
/// what lets the remote ledger grow by appending. No records encode to nothing.
pub fn encode_records(
    records: &[DiagnosticsRecord],
) -> core::result::Result<String, serde_yaml::Error> {
    if records.is_empty() {
        return Ok(String::new());
    }
    serde_yaml::to_string(records)
}

/// Decode a YAML list of maps. Blank text is an empty ledger.
pub fn decode_mapped(text: &str) -> Result<Vec<DiagnosticsRecord>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Columns of a legacy row, in order. `error` may be missing.
const TABULAR_COLUMNS: usize = 11;

/// Decode legacy CSV rows.
///
/// A header row and blank rows are skipped. Rows that cannot be read as a
/// record are logged and dropped so one bad line does not sink the history.
pub fn decode_tabular(text: &str) -> Result<Vec<DiagnosticsRecord>> {
    let rows = csv_rows
        .parse(text)
        .map_err(|e| LedgerError::Csv(e.to_string()))?;

    let mut records = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if index == 0 && row[0].trim().eq_ignore_ascii_case("timestamp") {
            continue;
        }
        match tabular_record(row) {
            Ok(record) => records.push(record),
            Err(reason) => {
                tracing::warn!(row = index + 1, %reason, "skipping legacy ledger row");
            }
        }
    }
    Ok(records)
}

fn tabular_record(row: &[String]) -> core::result::Result<DiagnosticsRecord, String> {
    if row.len() != TABULAR_COLUMNS && row.len() != TABULAR_COLUMNS - 1 {
        return Err(format!("{} columns", row.len()));
    }
    let timestamp = |i: usize| {
        parse_utc(&row[i]).map_err(|e| format!("bad timestamp {:?}: {e}", row[i]))
    };
    let value = |i: usize| parse_measurement(&row[i]);

    Ok(DiagnosticsRecord {
        id: None,
        timestamp: timestamp(0)?,
        next_startup_time: timestamp(1)?,
        battery_voltage: value(2),
        internal_voltage: value(3),
        internal_current: value(4),
        temperature: value(5),
        signal_quality: leading_integer(&row[6]),
        latitude: value(7),
        longitude: value(8),
        height: value(9),
        error: row.get(10).map(|e| e.trim().to_string()).unwrap_or_default(),
    })
}

/// `18,99` and `18` both mean RSSI 18.
fn leading_integer(text: &str) -> Option<u8> {
    let text = text.trim();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

fn csv_rows(input: &mut &str) -> ModalResult<Vec<Vec<String>>> {
    separated(0.., csv_row, line_ending).parse_next(input)
}

fn csv_row(input: &mut &str) -> ModalResult<Vec<String>> {
    separated(1.., csv_field, ',').parse_next(input)
}

fn csv_field(input: &mut &str) -> ModalResult<String> {
    alt((
        quoted_field,
        take_till(0.., (',', '"', '\r', '\n')).map(String::from),
    ))
    .parse_next(input)
}

/// `"..."` with `""` standing for a literal quote.
fn quoted_field(input: &mut &str) -> ModalResult<String> {
    delimited(
        '"',
        repeat(0.., alt(("\"\"".value('"'), none_of('"')))),
        '"',
    )
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    const LEGACY: &str = "\
timestamp,next_startup_time,battery_voltage,internal_voltage,internal_current,temperature,signal_quality,latitude,longitude,height,error
2023-08-01 06:00Z,2023-08-01 06:30Z,3.92V,5.12V,0.41A,21.5°C,\"18,99\",-,-,-,
2023-08-01 06:30Z,2023-08-01 07:00Z,3.90V,5.11V,0.40A,22.0°C,17,46.5,7.9,1510.2,\"Could not open image, retry \"\"later\"\"\"
";

    fn sample_record() -> DiagnosticsRecord {
        DiagnosticsRecord {
            id: Some(Uuid::new_v4()),
            timestamp: parse_utc("2024-03-12 10:30Z").unwrap(),
            next_startup_time: parse_utc("2024-03-12 11:00Z").unwrap(),
            battery_voltage: Some(3.92),
            internal_voltage: None,
            internal_current: None,
            temperature: Some(12.0),
            signal_quality: Some(18),
            latitude: Some(46.5),
            longitude: Some(7.9),
            height: Some(1510.0),
            error: "modem: timeout".to_string(),
        }
    }

    #[test]
    fn decodes_legacy_rows() {
        let records = decode_tabular(LEGACY).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.id, None);
        assert_eq!(first.battery_voltage, Some(3.92));
        assert_eq!(first.internal_current, Some(0.41));
        assert_eq!(first.temperature, Some(21.5));
        assert_eq!(first.signal_quality, Some(18));
        assert_eq!(first.latitude, None);
        assert!(first.error.is_empty());

        let second = &records[1];
        assert_eq!(second.latitude, Some(46.5));
        assert_eq!(second.height, Some(1510.2));
        assert_eq!(second.error, "Could not open image, retry \"later\"");
    }

    #[test]
    fn legacy_rows_without_error_column() {
        let text = "2023-08-01 06:00Z,2023-08-01 06:30Z,3.92V,5.12V,0.41A,21.5°C,18,-,-,-\r\n";
        let records = decode_tabular(text).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].error.is_empty());
    }

    #[test]
    fn legacy_next_startup_may_carry_seconds() {
        let text = "timestamp,next_startup_time,battery_voltage,internal_voltage,internal_current,temperature,signal_quality,latitude,longitude,height,error\n\
            2023-08-01 06:00Z,2023-08-01 06:30:00Z,3.92V,5.12V,0.41A,21.5°C,18,-,-,-,\n";
        let records = decode_tabular(text).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].next_startup_time,
            "2023-08-01T06:30:00Z".parse::<jiff::Timestamp>().unwrap()
        );
    }

    #[test]
    fn bad_legacy_rows_are_skipped() {
        let text = "not,a,record\n\
            2023-08-01 06:00Z,2023-08-01 06:30Z,3.92V,5.12V,0.41A,21.5°C,18,-,-,-,\n\
            yesterday,2023-08-01 06:30Z,3.92V,5.12V,0.41A,21.5°C,18,-,-,-,\n";
        let records = decode_tabular(text).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn unterminated_quote_fails() {
        let text = "2023-08-01 06:00Z,\"oops\n";
        assert!(matches!(decode_tabular(text), Err(LedgerError::Csv(_))));
    }

    #[test]
    fn sniffs_encoding() {
        assert!(matches!(
            LedgerDocument::decode(LEGACY).unwrap(),
            LedgerDocument::Tabular(records) if records.len() == 2
        ));

        let yaml = encode_records(&[sample_record()]).unwrap();
        assert!(matches!(
            LedgerDocument::decode(&yaml).unwrap(),
            LedgerDocument::Mapped(records) if records.len() == 1
        ));

        assert_eq!(
            LedgerDocument::decode("").unwrap(),
            LedgerDocument::Mapped(Vec::new())
        );
    }

    #[test]
    fn appended_encodings_form_one_list() {
        let a = sample_record();
        let b = sample_record();
        let text = encode_records(&[a.clone()]).unwrap() + &encode_records(&[b.clone()]).unwrap();

        assert_eq!(decode_mapped(&text).unwrap(), vec![a, b]);
    }

    #[test]
    fn no_records_encode_to_nothing() {
        assert_eq!(encode_records(&[]).unwrap(), "");
    }

    #[test]
    fn migrated_legacy_records_reencode() {
        let legacy = decode_tabular(LEGACY).unwrap();
        let yaml = encode_records(&legacy).unwrap();
        assert_eq!(decode_mapped(&yaml).unwrap(), legacy);
    }
}
