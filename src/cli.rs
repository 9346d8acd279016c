//! CLI interface for fieldcam.
//!
//! `fieldcam run` is what the boot service calls on every wake. The other
//! commands are for someone standing next to the camera with a laptop:
//!
//! - `fieldcam plan` shows the schedule a run would commit right now.
//! - `fieldcam buffer` lists diagnostics records waiting for connectivity.

mod format;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jiff::Zoned;
use jiff::tz::TimeZone;

use crate::board::WittyPi;
use crate::config::Config;
use crate::identity;
use crate::ledger::{DiagnosticsLedger, LocalBuffer};
use crate::modem::{AtChannel, SerialModem};
use crate::run::{self, Controller, Devices, RunOptions};
use crate::solar::SunriseEquation;
use crate::store::{DirectoryStore, RemoteStore};

use format::{format_preview, format_record, format_report};

/// fieldcam: wake schedule and power survival for a solar field camera.
#[derive(Debug, Parser)]
#[command(name = "fieldcam", version)]
pub struct Cli {
    /// Deployment config file (default: `~/.fieldcam/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output. Repeat for more.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one wake cycle: plan, commit the schedule, report, shut down.
    Run {
        /// Leave the host running at the end, whatever the settings say.
        #[arg(long)]
        no_shutdown: bool,
    },

    /// Show the schedule a run would commit now, without committing it.
    Plan,

    /// List diagnostics records not yet in the remote ledger.
    Buffer,
}

/// Run the CLI, returning an error message on failure.
///
/// `run` never fails on a bad config: the camera still has to schedule its
/// next wake, so it runs on defaults and reports the problem in its record.
pub fn run(cli: Cli) -> Result<(), String> {
    let explicit = cli.config.as_deref();
    let strict = || Config::load(explicit).map_err(|e| e.to_string());

    match cli.command {
        Command::Run { no_shutdown } => {
            let (config, error) = Config::load_or_default(explicit);
            cmd_run(&config, no_shutdown, error.map(|e| e.to_string()))
        }
        Command::Plan => cmd_plan(&strict()?),
        Command::Buffer => cmd_buffer(&strict()?),
    }
}

fn board(config: &Config) -> WittyPi {
    WittyPi::new(&config.witty_pi_dir, TimeZone::system())
}

fn cmd_run(
    config: &Config,
    no_shutdown: bool,
    config_error: Option<String>,
) -> Result<(), String> {
    let mut board = board(config);

    // Either device may be missing; the run records why and carries on.
    let mut serial_modem;
    let modem: Result<&mut dyn AtChannel, _> =
        match SerialModem::open(&config.serial_port, config.serial_baud) {
            Ok(opened) => {
                serial_modem = opened;
                Ok(&mut serial_modem)
            }
            Err(e) => Err(e),
        };
    let mut directory_store;
    let store: Result<&mut dyn RemoteStore, _> = match DirectoryStore::open(&config.store_root) {
        Ok(opened) => {
            directory_store = opened;
            Ok(&mut directory_store)
        }
        Err(e) => Err(e),
    };

    let devices = Devices {
        board: &mut board,
        modem,
        store,
        ephemeris: &SunriseEquation,
        serial: identity::cpu_serial(),
    };
    let options = RunOptions {
        allow_shutdown: !no_shutdown,
        config_error,
        ..RunOptions::default()
    };

    let report = Controller::new(config, options, devices).run(Zoned::now());
    println!("{}", format_report(&report));
    Ok(())
}

fn cmd_plan(config: &Config) -> Result<(), String> {
    let mut board = board(config);
    let preview = run::preview(config, &mut board, &SunriseEquation, &Zoned::now());
    println!("{}", format_preview(&preview));
    Ok(())
}

fn cmd_buffer(config: &Config) -> Result<(), String> {
    let buffer = LocalBuffer::new(&config.data_dir)
        .map_err(|e| format!("failed to open buffer: {e}"))?;
    let pending = DiagnosticsLedger::new(buffer)
        .pending()
        .map_err(|e| format!("failed to read buffer: {e}"))?;

    if pending.is_empty() {
        println!("No pending records");
        return Ok(());
    }

    for record in &pending {
        println!("{}", format_record(record));
    }
    Ok(())
}
