//! Log setup.
//!
//! Events go to stderr in compact form, which the service journal captures.
//! `RUST_LOG` overrides the verbosity picked on the command line.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Call once, before anything logs.
pub fn init(verbosity: u8) {
    let default = match verbosity {
        0 => "warn,fieldcam=info",
        1 => "warn,fieldcam=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
