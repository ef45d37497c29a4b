//! CLI definition for the daemon binary.

use std::path::PathBuf;

use clap::Parser;

/// Local port coordination daemon for development tools.
#[derive(Debug, Parser)]
#[command(name = "styxyd")]
#[command(version, about = "Coordinate development port assignments", long_about = None)]
pub struct Cli {
    /// TCP port the daemon listens on (loopback only)
    #[arg(long, default_value_t = 9876, env = "STYXY_PORT")]
    pub port: u16,

    /// Override the config directory location
    #[arg(long, value_name = "PATH", env = "STYXY_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Disable the background health reaper
    #[arg(long)]
    pub no_reaper: bool,

    /// Debounce window for snapshot saves, in milliseconds
    #[arg(long, default_value_t = 500, value_name = "MS")]
    pub save_debounce_ms: u64,

    /// Log filter (overrides RUST_LOG), e.g. "info" or "styxy=debug"
    #[arg(long, value_name = "FILTER")]
    pub log: Option<String>,
}
