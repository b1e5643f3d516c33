//! Configuration management for nightcap.
//!
//! The daemon is mostly driven from the command line, but the command to
//! run, the release delay and the logging setup can also be kept in a TOML
//! file. Values are resolved file first, then `NIGHTCAP_*` environment
//! variables, then command-line flags (applied by the binary).

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound accepted for `reactor.delay_ms`.
pub const MAX_DELAY_MS: u64 = 60_000;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Settings for the sleep reactor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReactorSection {
    /// Command and arguments run when the machine is about to sleep
    #[serde(default)]
    pub command: Vec<String>,

    /// Delay in milliseconds between command exit and lock release (default: 500)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Do not wait for the command before releasing the lock (default: false)
    #[serde(default)]
    pub background: bool,
}

fn default_delay_ms() -> u64 {
    500
}

impl Default for ReactorSection {
    fn default() -> Self {
        ReactorSection {
            command: Vec::new(),
            delay_ms: default_delay_ms(),
            background: false,
        }
    }
}

impl ReactorSection {
    /// Returns the post-command delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSection {
    /// Emit JSON lines instead of human readable text
    #[serde(default)]
    pub json: bool,

    /// Also write a daily rotated log file
    #[serde(default)]
    pub log_to_file: bool,

    /// Directory for log files (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            json: false,
            log_to_file: false,
            log_dir: default_log_dir(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Reactor settings
    #[serde(default)]
    pub reactor: ReactorSection,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSection,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            reactor: ReactorSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text, applying environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, otherwise the default location.
    ///
    /// An explicitly named file must exist. A missing default file yields
    /// the built-in defaults (still subject to environment overrides).
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(path)
                } else {
                    Self::from_toml_str("")
                }
            }
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "log_level".to_string(),
                message: format!("unknown level {:?}", self.log_level),
            });
        }

        if self.reactor.delay_ms > MAX_DELAY_MS {
            return Err(ConfigError::InvalidValue {
                key: "reactor.delay_ms".to_string(),
                message: format!("must not exceed {} ms", MAX_DELAY_MS),
            });
        }

        if self.reactor.command.first().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "reactor.command".to_string(),
                message: "program name cannot be empty".to_string(),
            });
        }

        if self.logging.log_to_file && self.logging.log_dir.trim().is_empty() {
            return Err(ConfigError::MissingValue("logging.log_dir".to_string()));
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: NIGHTCAP_)
    ///
    /// - NIGHTCAP_LOG_LEVEL
    /// - NIGHTCAP_REACTOR_COMMAND (whitespace separated), NIGHTCAP_REACTOR_DELAY_MS,
    ///   NIGHTCAP_REACTOR_BACKGROUND
    /// - NIGHTCAP_LOGGING_JSON
    fn apply_env_overrides(&mut self) {
        use std::env;

        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }

        if let Ok(v) = env::var("NIGHTCAP_LOG_LEVEL") {
            if !v.is_empty() {
                self.log_level = v;
            }
        }
        if let Ok(v) = env::var("NIGHTCAP_REACTOR_COMMAND") {
            let words: Vec<String> = v.split_whitespace().map(str::to_string).collect();
            if !words.is_empty() {
                self.reactor.command = words;
            }
        }
        if let Ok(v) = env::var("NIGHTCAP_REACTOR_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.reactor.delay_ms = ms;
            }
        }
        if let Ok(v) = env::var("NIGHTCAP_REACTOR_BACKGROUND") {
            if let Some(b) = parse_bool(&v) {
                self.reactor.background = b;
            }
        }
        if let Ok(v) = env::var("NIGHTCAP_LOGGING_JSON") {
            if let Some(b) = parse_bool(&v) {
                self.logging.json = b;
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("nightcap").join("config.toml")
        } else {
            PathBuf::from("nightcap.toml")
        }
    }
}
