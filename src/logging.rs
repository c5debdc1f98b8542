//! Log setup for the command line tool
//!
//! Logs go to stderr so they never mix with search output. `RUST_LOG`
//! takes precedence over the verbosity flags.

use tracing_subscriber::EnvFilter;

/// Filter directive for `-v` repetitions: warnings by default
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "rgstream=warn",
        1 => "rgstream=info",
        2 => "rgstream=debug",
        _ => "rgstream=trace",
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
