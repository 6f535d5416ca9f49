//! Command-line options parsed with `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "trakbridge", about = "Position-to-CoT-to-TAK event pipeline")]
pub struct Options {
    /// Path to the YAML configuration file.
    #[arg(long, env = "TRAKBRIDGE_CONFIG_FILE", required = true)]
    pub config_file: PathBuf,

    /// Overrides `logging.format` from the config file (`pretty` or `json`).
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}
