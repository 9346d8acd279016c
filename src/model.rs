//! Core data model for the field camera.
//!
//! These types flow between the run stages: the wake schedule being planned,
//! what the power board and GPS module reported, and the diagnostics record
//! that ends up in the ledger.

mod gps;
mod power;
mod record;
mod schedule;

pub use gps::GpsFix;
pub use power::{PowerState, parse_measurement};
pub use record::{DiagnosticsRecord, NEXT_STARTUP_FORMAT, TIMESTAMP_FORMAT, parse_utc};
pub use schedule::{MINUTES_PER_DAY, ScheduleEvent, SchedulePlan, WakeSchedule};
