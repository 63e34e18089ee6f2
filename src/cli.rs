//! Command-line interface parsing for the treasury proxy
//!
//! This module handles parsing of CLI arguments using clap. Flags override the
//! values loaded from the config file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::config::Config;
use crate::query::FetchMode;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified mode name is not recognized
    #[error("Invalid mode: '{0}'. Valid modes: cached, passthrough")]
    InvalidMode(String),

    /// The bind address is not a socket address
    #[error("Invalid bind address: '{0}'")]
    InvalidBind(String),
}

/// Caching proxy for the Treasury condominium appraisal dataset
#[derive(Parser, Debug)]
#[command(name = "treasury-proxy")]
#[command(about = "Caching proxy for Treasury condominium appraisal data")]
#[command(version)]
pub struct Cli {
    /// Path to config file (default: ./treasury-proxy.yaml, then the user config dir)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:3000
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Where results come from: cached or passthrough
    #[arg(long, value_name = "MODE", value_parser = parse_mode_arg)]
    pub mode: Option<FetchMode>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Hide upstream failure details from error responses
    #[arg(long)]
    pub production: bool,
}

/// Parses a mode string argument into a FetchMode.
///
/// # Arguments
/// * `s` - The mode string from CLI
///
/// # Returns
/// * `Ok(FetchMode)` if the string matches a known mode
/// * `Err(CliError::InvalidMode)` if it doesn't
pub fn parse_mode_arg(s: &str) -> Result<FetchMode, CliError> {
    FetchMode::from_str(s).ok_or_else(|| CliError::InvalidMode(s.to_string()))
}

impl Cli {
    /// Applies command-line overrides on top of a loaded configuration.
    ///
    /// # Arguments
    /// * `config` - Configuration loaded from file or defaults
    ///
    /// # Returns
    /// * `Ok(Config)` with overrides applied
    /// * `Err(CliError)` if the resulting bind address is invalid
    pub fn apply(&self, mut config: Config) -> Result<Config, CliError> {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(mode) = self.mode {
            config.server.mode = mode;
        }
        if self.production {
            config.server.expose_error_details = false;
        }

        config
            .server
            .bind
            .parse::<SocketAddr>()
            .map_err(|_| CliError::InvalidBind(config.server.bind.clone()))?;

        Ok(config)
    }
}
