//! Output formatting for CLI display.

use std::fmt::Write;

use crate::ledger::FlushOutcome;
use crate::model::{DiagnosticsRecord, NEXT_STARTUP_FORMAT, TIMESTAMP_FORMAT};
use crate::run::{Preview, RunReport};

pub(super) fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "plan:          {} ({})", report.plan, report.mode);
    let _ = writeln!(
        out,
        "next startup:  {}",
        report.next_startup.strftime(NEXT_STARTUP_FORMAT)
    );
    let _ = writeln!(out, "diagnostics:   {}", format_flush(report.flush));
    if !report.record.error.is_empty() {
        let _ = writeln!(out, "errors:        {}", report.record.error);
    }
    let _ = write!(
        out,
        "shutdown:      {}",
        if report.shut_down { "requested" } else { "skipped" }
    );
    out
}

fn format_flush(flush: Option<FlushOutcome>) -> String {
    match flush {
        Some(FlushOutcome::Uploaded { records }) => format!("{records} uploaded"),
        Some(FlushOutcome::Buffered { pending }) => format!("buffered ({pending} pending)"),
        None => "lost".to_string(),
    }
}

pub(super) fn format_preview(preview: &Preview) -> String {
    let mut out = String::new();
    let battery = preview
        .battery_voltage
        .map_or_else(|| "unknown".to_string(), |v| format!("{v:.2} V"));
    let _ = writeln!(out, "battery:  {battery} ({})", preview.mode);
    let _ = writeln!(out, "plan:     {}", preview.plan);
    let _ = writeln!(
        out,
        "awake:    {} min per wake",
        preview.settings.max_duration_minute
    );
    match &preview.events {
        Ok(events) => {
            let times: Vec<String> = events.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "wakes:    {}", times.join(" "));
        }
        Err(e) => {
            let _ = writeln!(out, "wakes:    cannot compile ({e})");
        }
    }
    if !preview.errors.is_empty() {
        let _ = writeln!(out, "errors:   {}", preview.errors.text());
    }
    out.trim_end().to_string()
}

/// One line per buffered record.
pub(super) fn format_record(record: &DiagnosticsRecord) -> String {
    let short_id = record
        .id
        .map_or_else(|| "--------".to_string(), |id| id.to_string()[..8].to_string());
    let battery = record
        .battery_voltage
        .map_or_else(|| "-".to_string(), |v| format!("{v:.2}V"));

    let mut line = format!(
        "{short_id}  {}  battery {battery}",
        record.timestamp.strftime(TIMESTAMP_FORMAT)
    );
    if !record.error.is_empty() {
        let _ = write!(line, "  [{}]", record.error);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    use crate::model::parse_utc;

    fn sample_record(error: &str) -> DiagnosticsRecord {
        DiagnosticsRecord {
            id: Some(Uuid::parse_str("a3b0fc12-0000-4000-8000-000000000000").unwrap()),
            timestamp: parse_utc("2024-03-12 10:30Z").unwrap(),
            next_startup_time: parse_utc("2024-03-12 11:00Z").unwrap(),
            battery_voltage: Some(3.6),
            internal_voltage: None,
            internal_current: None,
            temperature: None,
            signal_quality: None,
            latitude: None,
            longitude: None,
            height: None,
            error: error.to_string(),
        }
    }

    #[test]
    fn record_line() {
        assert_eq!(
            format_record(&sample_record("")),
            "a3b0fc12  2024-03-12 10:30Z  battery 3.60V"
        );
        assert_eq!(
            format_record(&sample_record("gps: timeout")),
            "a3b0fc12  2024-03-12 10:30Z  battery 3.60V  [gps: timeout]"
        );
    }

    #[test]
    fn flush_outcomes() {
        assert_eq!(
            format_flush(Some(FlushOutcome::Uploaded { records: 3 })),
            "3 uploaded"
        );
        assert_eq!(
            format_flush(Some(FlushOutcome::Buffered { pending: 2 })),
            "buffered (2 pending)"
        );
        assert_eq!(format_flush(None), "lost");
    }
}
