//! One wake cycle, start to shutdown.
//!
//! Stages run in a fixed order and hand a [`RunContext`] from one to the next.
//! A failing stage records its error and the run carries on; the schedule
//! commit and the shutdown are always reached.

use std::fmt;
use std::io;
use std::path::Path;

use jiff::{Timestamp, Zoned};

use crate::board::PowerBoard;
use crate::config::Config;
use crate::gps::{GpsAcquisition, GpsTiming};
use crate::identity;
use crate::ledger::{self, DiagnosticsLedger, FlushOutcome, LocalBuffer};
use crate::model::{DiagnosticsRecord, GpsFix, PowerState, ScheduleEvent, SchedulePlan};
use crate::modem::{self, AtChannel, ModemError};
use crate::policy::{PowerMode, PowerSurvivalPolicy};
use crate::schedule::{self, ScheduleError};
use crate::settings::{self, Settings, SyncAction};
use crate::solar::{Ephemeris, SolarWindowPlanner};
use crate::store::{RemoteStore, StoreError};

/// Non-fatal failures of a run, in the order they happened.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorLog {
    entries: Vec<String>,
}

impl ErrorLog {
    pub fn record(&mut self, stage: &str, error: impl fmt::Display) {
        tracing::warn!(stage, error = %error, "stage failed");
        self.entries.push(format!("{stage}: {error}"));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries as one line, for the diagnostics record.
    pub fn text(&self) -> String {
        self.entries.join("; ")
    }
}

/// State threaded through the stages of one run.
#[derive(Debug)]
pub struct RunContext {
    pub started: Zoned,
    pub settings: Settings,

    /// Settings as loaded, to tell whether the run changed them.
    loaded_settings: Settings,

    pub errors: ErrorLog,
    pub power: Option<PowerState>,
    pub plan: SchedulePlan,
    pub mode: PowerMode,
    pub next_startup: Option<Timestamp>,
    pub fix: Option<GpsFix>,
    pub signal_quality: Option<u8>,
}

impl RunContext {
    fn new(started: Zoned) -> Self {
        let settings = Settings::default();
        Self {
            started,
            plan: settings.static_plan(),
            loaded_settings: settings.clone(),
            settings,
            errors: ErrorLog::default(),
            power: None,
            mode: PowerMode::Nominal,
            next_startup: None,
            fix: None,
            signal_quality: None,
        }
    }
}

/// The hardware and services one run talks to.
///
/// The modem and the store may have failed to open; the run records why and
/// continues without them.
pub struct Devices<'d> {
    pub board: &'d mut dyn PowerBoard,
    pub modem: Result<&'d mut dyn AtChannel, ModemError>,
    pub store: Result<&'d mut dyn RemoteStore, StoreError>,
    pub ephemeris: &'d dyn Ephemeris,

    /// CPU serial of this device, for the remote folder name.
    pub serial: io::Result<String>,
}

impl Devices<'_> {
    fn store(&mut self) -> Option<&mut dyn RemoteStore> {
        match &mut self.store {
            Ok(store) => Some(&mut **store),
            Err(_) => None,
        }
    }

    fn modem(&mut self) -> Option<&mut dyn AtChannel> {
        match &mut self.modem {
            Ok(modem) => Some(&mut **modem),
            Err(_) => None,
        }
    }
}

/// Knobs that do not come from the config files.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Power down at the end if the settings ask for it.
    pub allow_shutdown: bool,
    pub gps_timing: GpsTiming,

    /// Why the deployment config fell back to defaults, if it did.
    pub config_error: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            allow_shutdown: true,
            gps_timing: GpsTiming::default(),
            config_error: None,
        }
    }
}

/// What a run did.
#[derive(Debug)]
pub struct RunReport {
    pub plan: SchedulePlan,
    pub mode: PowerMode,
    pub next_startup: Timestamp,
    pub record: DiagnosticsRecord,
    pub flush: Option<FlushOutcome>,
    pub shut_down: bool,
}

/// Runs the stages of one wake cycle.
pub struct Controller<'a> {
    config: &'a Config,
    options: RunOptions,
    devices: Devices<'a>,
}

impl<'a> Controller<'a> {
    pub fn new(config: &'a Config, options: RunOptions, devices: Devices<'a>) -> Self {
        Self {
            config,
            options,
            devices,
        }
    }

    /// Run every stage. Never fails: problems end up in the record.
    pub fn run(mut self, started: Zoned) -> RunReport {
        tracing::info!(started = %started, "run started");
        let ctx = RunContext::new(started);

        let ctx = self.connect(ctx);
        let ctx = self.load_settings(ctx);
        let ctx = self.configure_board(ctx);
        let ctx = self.read_power(ctx);
        let ctx = self.plan(ctx);
        let ctx = self.apply_policy(ctx);
        let ctx = self.commit_schedule(ctx);
        let ctx = self.acquire_position(ctx);
        let ctx = self.read_signal(ctx);
        let ctx = self.persist_settings(ctx);

        let next_startup = ctx
            .next_startup
            .unwrap_or_else(|| schedule::next_occurrence(&[ctx.plan.start], &ctx.started));
        let record = ledger::assemble(
            ctx.started.timestamp(),
            next_startup,
            ctx.power.as_ref(),
            ctx.fix.as_ref(),
            ctx.signal_quality,
            ctx.errors.text(),
        );

        let flush = self.flush(record.clone());
        if !ctx.errors.is_empty() {
            tracing::warn!(errors = %ctx.errors.text(), "run finished with errors");
        }
        let shut_down = self.shutdown(&ctx);

        RunReport {
            plan: ctx.plan,
            mode: ctx.mode,
            next_startup,
            record,
            flush,
            shut_down,
        }
    }

    /// Note unavailable devices and move into this camera's remote folder.
    fn connect(&mut self, mut ctx: RunContext) -> RunContext {
        if let Some(e) = &self.options.config_error {
            ctx.errors.record("config", e);
        }
        if let Err(e) = &self.devices.modem {
            ctx.errors.record("modem", e);
        }
        if let Err(e) = &self.devices.store {
            ctx.errors.record("store", e);
            return ctx;
        }
        if !self.config.multi_camera {
            return ctx;
        }

        let serial = match &self.devices.serial {
            Ok(serial) => serial.clone(),
            Err(e) => {
                ctx.errors.record("identity", e);
                identity::UNKNOWN_SERIAL.to_string()
            }
        };
        let folder = identity::folder_name(&self.config.camera_name, &serial);
        if let Some(store) = self.devices.store()
            && let Err(e) = store.change_directory(&folder, true)
        {
            ctx.errors.record("store", &e);
            self.devices.store = Err(e);
        }
        ctx
    }

    fn load_settings(&mut self, mut ctx: RunContext) -> RunContext {
        let path = self.config.settings_path();
        if let Some(store) = self.devices.store() {
            match settings::sync(&path, store) {
                Ok(SyncAction::UpToDate) => {}
                Ok(action) => tracing::info!(?action, "settings synchronised"),
                Err(e) => ctx.errors.record("settings sync", e),
            }
        }

        ctx.settings = load_local_settings(&path, &mut ctx.errors);
        ctx.loaded_settings = ctx.settings.clone();
        ctx.plan = ctx.settings.static_plan();
        ctx
    }

    fn configure_board(&mut self, mut ctx: RunContext) -> RunContext {
        let board = &mut *self.devices.board;
        if ctx.settings.time_sync
            && let Err(e) = board.sync_time()
        {
            ctx.errors.record("time sync", e);
        }

        let low = ctx.settings.low_voltage_threshold;
        let recovery = ctx.settings.recovery_voltage_threshold;
        if recovery >= low {
            if let Err(e) = board.set_low_voltage_threshold(low) {
                ctx.errors.record("low voltage threshold", e);
            }
            if let Err(e) = board.set_recovery_voltage_threshold(recovery) {
                ctx.errors.record("recovery voltage threshold", e);
            }
        }
        ctx
    }

    fn read_power(&mut self, mut ctx: RunContext) -> RunContext {
        match self.devices.board.read_power_state() {
            Ok(power) => {
                tracing::info!(battery = power.battery_voltage, "power state");
                ctx.power = Some(power);
            }
            Err(e) => ctx.errors.record("power", e),
        }
        ctx
    }

    fn plan(&mut self, mut ctx: RunContext) -> RunContext {
        let planner =
            SolarWindowPlanner::new(self.devices.ephemeris, ctx.started.time_zone().clone());
        match planner.plan(&ctx.settings, ctx.started.date()) {
            Ok(plan) => ctx.plan = plan,
            Err(e) => {
                ctx.errors.record("solar", e);
                ctx.plan = ctx.settings.static_plan();
            }
        }
        ctx
    }

    fn apply_policy(&mut self, mut ctx: RunContext) -> RunContext {
        let policy = PowerSurvivalPolicy::from_settings(&ctx.settings);
        let voltage = ctx.power.map(|p| p.battery_voltage);
        (ctx.plan, ctx.mode) = policy.apply(ctx.plan, voltage);
        ctx
    }

    fn commit_schedule(&mut self, mut ctx: RunContext) -> RunContext {
        let commit = schedule::commit(
            &mut *self.devices.board,
            ctx.plan,
            ctx.settings.max_duration_minute,
            &ctx.started,
        );
        if let Some(failure) = commit.failure {
            ctx.errors.record("schedule", failure);
        }
        ctx.plan = commit.plan;
        ctx.next_startup = Some(commit.next_startup);
        ctx
    }

    fn acquire_position(&mut self, mut ctx: RunContext) -> RunContext {
        if !ctx.settings.enable_gps {
            return ctx;
        }
        let timing = self.options.gps_timing;
        let Some(modem) = self.devices.modem() else {
            return ctx;
        };

        match GpsAcquisition::new(modem, timing).run() {
            Ok(fix) => {
                ctx.settings.latitude = fix.latitude;
                ctx.settings.longitude = fix.longitude;
                ctx.fix = Some(fix);
            }
            Err(e) => ctx.errors.record("gps", e),
        }
        ctx
    }

    fn read_signal(&mut self, mut ctx: RunContext) -> RunContext {
        let Some(modem) = self.devices.modem() else {
            return ctx;
        };
        match modem::signal_quality(modem) {
            Ok(rssi) => ctx.signal_quality = Some(rssi),
            Err(e) => ctx.errors.record("signal quality", e),
        }
        ctx
    }

    /// Write back settings the run changed. Power policy changes are per run
    /// and live only in `ctx.plan`, never in the settings.
    fn persist_settings(&mut self, mut ctx: RunContext) -> RunContext {
        if ctx.settings == ctx.loaded_settings {
            return ctx;
        }
        let path = self.config.settings_path();
        if let Err(e) = settings::publish(&ctx.settings, &path, self.devices.store()) {
            ctx.errors.record("settings", e);
        }
        ctx
    }

    fn flush(&mut self, record: DiagnosticsRecord) -> Option<FlushOutcome> {
        let ledger = match LocalBuffer::new(&self.config.data_dir) {
            Ok(buffer) => DiagnosticsLedger::new(buffer),
            Err(e) => {
                tracing::error!(error = %e, "no local buffer, record lost");
                return None;
            }
        };
        ledger
            .flush(record, self.devices.store())
            .inspect_err(|e| tracing::warn!(error = %e, "flush failed, record kept locally"))
            .ok()
    }

    /// The record is already flushed by now, so a failure only reaches the log.
    fn shutdown(&mut self, ctx: &RunContext) -> bool {
        if !ctx.settings.shutdown || !self.options.allow_shutdown {
            tracing::info!("staying up");
            return false;
        }
        tracing::info!(next_startup = ?ctx.next_startup, "shutting down");
        match self.devices.board.shutdown() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "shutdown failed");
                false
            }
        }
    }
}

/// Read the local settings, falling back to defaults.
fn load_local_settings(path: &Path, errors: &mut ErrorLog) -> Settings {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no settings file, using defaults");
        return Settings::default();
    }
    let (settings, error) = Settings::load_or_default(path);
    if let Some(e) = error {
        errors.record("settings", e);
    }
    settings
}

/// The schedule a run would commit right now, without touching the board's
/// schedule or the remote store.
#[derive(Debug)]
pub struct Preview {
    pub settings: Settings,
    pub battery_voltage: Option<f64>,
    pub plan: SchedulePlan,
    pub mode: PowerMode,
    pub events: Result<Vec<ScheduleEvent>, ScheduleError>,
    pub errors: ErrorLog,
}

pub fn preview(
    config: &Config,
    board: &mut dyn PowerBoard,
    ephemeris: &dyn Ephemeris,
    now: &Zoned,
) -> Preview {
    let mut errors = ErrorLog::default();
    let settings = load_local_settings(&config.settings_path(), &mut errors);

    let battery_voltage = board
        .read_battery_voltage()
        .inspect_err(|e| errors.record("power", e))
        .ok();

    let planner = SolarWindowPlanner::new(ephemeris, now.time_zone().clone());
    let plan = planner
        .plan(&settings, now.date())
        .unwrap_or_else(|e| {
            errors.record("solar", e);
            settings.static_plan()
        });
    let (plan, mode) = PowerSurvivalPolicy::from_settings(&settings).apply(plan, battery_voltage);

    Preview {
        events: schedule::build_events(&plan),
        settings,
        battery_voltage,
        plan,
        mode,
        errors,
    }
}
