//! CLI argument parsing with clap derive

use std::path::PathBuf;

use clap::Parser;

/// Per-host agent of the satellite emulation platform
#[derive(Debug, Parser)]
#[command(name = "sand-daemon", version)]
pub struct Cli {
    /// Daemon configuration file
    #[arg(
        short,
        long,
        env = "SAND_DAEMON_CONFIG",
        default_value = "/etc/sand-daemon/daemon.yaml"
    )]
    pub config: PathBuf,

    /// Address to listen on for manager commands (overrides the configuration)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Default log directive when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
