//! Command-line flags for ironstream-daemon.

use std::path::PathBuf;

use clap::Parser;

use ironstream_core::config::GeneralConfig;

/// Ironstream security event streaming and correlation daemon.
#[derive(Parser, Debug)]
#[command(name = "ironstream-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the ironstream.toml configuration file.
    #[arg(short, long, default_value = "/etc/ironstream/ironstream.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration and rule directory, then exit.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Applies the `--log-*` overrides to the loaded `[general]` section.
    pub fn apply_overrides(&self, general: &mut GeneralConfig) {
        if let Some(level) = &self.log_level {
            general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            general.log_format = format.clone();
        }
    }
}
