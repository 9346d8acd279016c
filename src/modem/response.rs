//! Parsers for the modem's AT responses.
//!
//! Responses echo the command, then carry zero or more `+NAME: ...` lines and
//! end with `OK` or `ERROR`. Only the payload line is parsed here; the rest
//! is located by line.

use jiff::{Timestamp, civil::DateTime, tz::TimeZone};
use winnow::ascii::{digit1, space0};
use winnow::combinator::{preceded, separated};
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::take_till;

use crate::model::GpsFix;

/// What a position query returned.
#[derive(Debug, Clone, PartialEq)]
pub enum GpsResponse {
    Fix(GpsFix),

    /// The receiver answered but has no fix yet: `+CGPSINFO: ,,,,,,,,`.
    NotReady,

    /// No parseable payload line.
    Malformed(String),
}

/// Whether the response ends in `OK`.
pub fn acknowledged(response: &str) -> bool {
    response.lines().any(|line| line.trim() == "OK")
}

/// Find the payload line for `prefix` (e.g. `+CSQ:`).
fn payload_line<'r>(response: &'r str, prefix: &str) -> Option<&'r str> {
    response
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(prefix))
}

fn gps_fields<'s>(input: &mut &'s str) -> ModalResult<Vec<&'s str>> {
    preceded(
        ("+CGPSINFO:", space0),
        separated(0.., take_till(0.., ','), ','),
    )
    .parse_next(input)
}

fn signal_fields(input: &mut &str) -> ModalResult<(u8, u8)> {
    (
        preceded(("+CSQ:", space0), digit1.parse_to()),
        preceded(',', digit1.parse_to()),
    )
        .parse_next(input)
}

/// Parse an `AT+CGPSINFO` response.
///
/// Example payload: `+CGPSINFO: 4717.112671,N,00833.914843,E,120324,101112.0,499.6,0.0,`
/// (latitude ddmm.mmmm, longitude dddmm.mmmm, date ddmmyy, UTC time hhmmss.s,
/// altitude in meters, speed, course).
pub fn parse_gps_info(response: &str) -> GpsResponse {
    let malformed = || GpsResponse::Malformed(response.trim().to_string());

    let Some(line) = payload_line(response, "+CGPSINFO:") else {
        return malformed();
    };
    let Ok(fields) = gps_fields.parse(line) else {
        return malformed();
    };
    if fields.len() < 4 {
        return malformed();
    }
    if fields[..4].iter().all(|f| f.trim().is_empty()) {
        return GpsResponse::NotReady;
    }

    let latitude = coordinate(fields[0], fields[1], 2, 'S');
    let longitude = coordinate(fields[2], fields[3], 3, 'W');
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return malformed();
    };
    let height_meters = fields
        .get(6)
        .and_then(|h| h.trim().parse().ok())
        .unwrap_or(0.0);
    let timestamp = match (fields.get(4), fields.get(5)) {
        (Some(date), Some(time)) => fix_time(date, time),
        _ => None,
    };

    GpsResponse::Fix(GpsFix {
        latitude,
        longitude,
        height_meters,
        timestamp,
    })
}

/// Convert `ddmm.mmmm` (or `dddmm.mmmm`) plus a hemisphere to signed degrees.
fn coordinate(value: &str, hemisphere: &str, degree_digits: usize, negative: char) -> Option<f64> {
    let value = value.trim();
    let degrees: f64 = value.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = value.get(degree_digits..)?.parse().ok()?;
    if minutes >= 60.0 {
        return None;
    }
    let magnitude = degrees + minutes / 60.0;

    match hemisphere.trim().chars().next()? {
        c if c == negative => Some(-magnitude),
        'N' | 'S' | 'E' | 'W' => Some(magnitude),
        _ => None,
    }
}

/// Receiver date `ddmmyy` and UTC time `hhmmss.s` as an instant.
fn fix_time(date: &str, time: &str) -> Option<Timestamp> {
    let time = time.trim().split('.').next()?;
    let text = format!("{} {time}", date.trim());
    let datetime = DateTime::strptime("%d%m%y %H%M%S", &text).ok()?;
    Some(datetime.to_zoned(TimeZone::UTC).ok()?.timestamp())
}

/// Parse an `AT+CSQ` response into the RSSI value (0-31, 99 = unknown).
pub fn parse_signal_quality(response: &str) -> Option<u8> {
    let line = payload_line(response, "+CSQ:")?;
    let (rssi, _ber) = signal_fields.parse(line).ok()?;
    Some(rssi)
}
