//! Command-line arguments and their merge with the configuration file.

use clap::Parser;
use nightcap_utils::logging::{parse_level, LogOptions};
use nightcap_utils::Config;
use std::path::PathBuf;

use crate::reactor::ReactorConfig;
use crate::timeout::RunMode;

/// Run a command when the system is about to sleep
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Release the lock after a fixed delay instead of waiting for the
    /// command (for lockers that do not fork)
    #[clap(short, long)]
    pub background: bool,

    /// Enable debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Read control bytes from stdin instead of D-Bus (s, w, e, k)
    #[clap(long)]
    pub script: bool,

    /// Delay in milliseconds between command exit and lock release
    #[clap(long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Path to the configuration file
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log in JSON format
    #[clap(long)]
    pub json_logs: bool,

    /// Command to run, followed by its arguments
    #[clap(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Everything the daemon needs after flags, environment and file have
/// been merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub program: String,
    pub args: Vec<String>,
    pub reactor: ReactorConfig,
    pub script: bool,
}

impl Args {
    /// Apply command-line flags on top of `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(delay) = self.delay {
            config.reactor.delay_ms = delay;
        }
        if self.background {
            config.reactor.background = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.debug {
            config.log_level = "debug".to_string();
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if !self.command.is_empty() {
            config.reactor.command = self.command.clone();
        }
    }

    /// Resolve the final settings. `None` when no command is given on
    /// the command line or in the configuration.
    pub fn settings(&self, config: &Config) -> Option<Settings> {
        let (program, args) = config.reactor.command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        let mode = if config.reactor.background {
            RunMode::Background
        } else {
            RunMode::Foreground
        };
        Some(Settings {
            program: program.clone(),
            args: args.to_vec(),
            reactor: ReactorConfig {
                delay: config.reactor.delay(),
                mode,
            },
            script: self.script,
        })
    }

    pub fn log_options(&self, config: &Config) -> LogOptions {
        let mut options = LogOptions::from_config(config);
        if self.debug {
            options.level = parse_level("debug");
        }
        options
    }
}
