mod board;
mod cli;
mod config;
mod gps;
mod identity;
mod ledger;
mod logging;
mod model;
mod modem;
mod policy;
mod run;
mod schedule;
mod settings;
mod solar;
mod store;

use std::process;

use clap::Parser;

use cli::Cli;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = cli::run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
