//! Power-management backends.
//!
//! A backend knows which notifications mean "about to sleep" and "woke up",
//! and owns the sleep inhibition lock. Exactly one backend is selected at
//! startup and kept for the lifetime of the process.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod dbus;
pub mod logind;
pub mod script;
pub mod upower;

pub use logind::LogindBackend;
pub use script::{ScriptBackend, ScriptLauncher};
pub use upower::UPowerBackend;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error type for backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    /// The signal does not belong to this backend or carries a bad payload
    #[error("invalid signal: {0}")]
    InvalidSignal(Signal),

    /// Taking the sleep inhibit lock failed
    #[error("inhibit failed: {0}")]
    Inhibit(String),

    /// Querying the maximum inhibit delay failed
    #[error("query failed: {0}")]
    Query(String),

    /// D-Bus transport error
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// No backend could be initialised
    #[error("no backend available")]
    Unavailable,
}

/// Classification of a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepEvent {
    /// The system is about to sleep
    Sleep,
    /// The system has resumed; a fresh inhibit lock is held if supported
    Wakeup,
}

/// A notification delivered by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Object path the signal was emitted from
    pub path: String,

    /// Fully qualified member name, `interface.Member`
    pub name: String,

    /// First body argument, when it is a boolean
    pub payload: Option<bool>,
}

impl Signal {
    pub fn new(path: impl Into<String>, name: impl Into<String>, payload: Option<bool>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            payload,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Some(b) => write!(f, "{} {}({})", self.path, self.name, b),
            None => write!(f, "{} {}()", self.path, self.name),
        }
    }
}

/// Backend trait
///
/// Every method is called from the reactor task only, so implementations
/// need no internal locking around the held inhibit resource.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name used in diagnostics
    fn name(&self) -> &'static str;

    /// Signal match rule, `"none"` when signals do not come from D-Bus
    fn filter(&self) -> String;

    /// Classify a signal.
    ///
    /// Signals other than this backend's sleep and wakeup notifications
    /// fail with [`BackendError::InvalidSignal`]. On wakeup a backend that
    /// supports it takes a fresh inhibit lock before returning; if that
    /// fails the error is returned instead of [`SleepEvent::Wakeup`].
    async fn classify(&mut self, signal: &Signal) -> BackendResult<SleepEvent>;

    /// Take a sleep inhibit lock, dropping any lock already held first.
    async fn acquire_inhibit(&mut self) -> BackendResult<()>;

    /// Release the sleep inhibit lock. Not an error when none is held.
    async fn release(&mut self) -> BackendResult<()>;

    /// Maximum time the platform lets an inhibit lock delay sleep.
    ///
    /// `None` means the platform does not advertise a ceiling.
    async fn max_inhibit_hold(&self) -> BackendResult<Option<Duration>>;
}

/// D-Bus backends in selection order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Logind,
    UPower,
}

impl BackendKind {
    /// Candidates tried at startup, primary first
    pub const PRIORITY: [BackendKind; 2] = [BackendKind::Logind, BackendKind::UPower];

    /// Run the startup probe of this backend on `conn`.
    pub async fn try_init(self, conn: &zbus::Connection) -> BackendResult<Box<dyn Backend>> {
        match self {
            BackendKind::Logind => Ok(Box::new(LogindBackend::new(conn).await?)),
            BackendKind::UPower => Ok(Box::new(UPowerBackend::new(conn).await?)),
        }
    }

    /// Match rule for this backend's signals
    pub fn match_rule(self) -> BackendResult<zbus::MatchRule<'static>> {
        match self {
            BackendKind::Logind => logind::match_rule(),
            BackendKind::UPower => upower::match_rule(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_puts_logind_first() {
        assert_eq!(BackendKind::PRIORITY[0], BackendKind::Logind);
        assert_eq!(BackendKind::PRIORITY[1], BackendKind::UPower);
    }

    #[test]
    fn signal_display_includes_payload() {
        let sig = Signal::new("/a", "x.Y", Some(true));
        assert_eq!(sig.to_string(), "/a x.Y(true)");
        let sig = Signal::new("/a", "x.Z", None);
        assert_eq!(sig.to_string(), "/a x.Z()");
    }

    #[test]
    fn match_rules_name_the_sleep_members() {
        let logind = BackendKind::Logind.match_rule().unwrap().to_string();
        assert!(logind.contains("PrepareForSleep"));
        let upower = BackendKind::UPower.match_rule().unwrap().to_string();
        assert!(upower.contains("NotifySleep"));
    }
}
