//! Shared utilities for nightcap components.
//!
//! This crate holds the pieces that are not specific to the sleep reactor
//! itself: loading the TOML configuration and setting up process-wide
//! logging.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, ReactorSection};
pub use logging::{LogOptions, init_logging};
