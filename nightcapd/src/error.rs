//! Error type for the reactor.

use thiserror::Error;

/// Result type for reactor operations
pub type ReactorResult<T> = Result<T, ReactorError>;

/// Errors that stop the reactor. Everything else is logged and the loop
/// carries on.
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The signal channel was closed by its sender
    #[error("signal source closed")]
    SignalSourceClosed,
}
