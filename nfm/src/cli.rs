//! CLI argument parsing for NFM

use std::path::PathBuf;

use clap::Parser;

/// NPU Fault Manager - cluster fault correlation and in-place recovery filtering
#[derive(Debug, Parser)]
#[command(name = "nfm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/nfm/config.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "NFM_LOG_LEVEL")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, default_value = "false", env = "NFM_LOG_JSON")]
    pub log_json: bool,

    /// Run a single reconciliation pass over --snapshot and print the result
    #[arg(long, requires = "snapshot")]
    pub once: bool,

    /// JSON map of node name to device info, used by --once
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
