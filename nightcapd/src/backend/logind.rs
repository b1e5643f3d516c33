//! systemd-logind backend.
//!
//! logind broadcasts `PrepareForSleep(true)` before suspending and
//! `PrepareForSleep(false)` after resuming. A "delay" inhibitor lock is a
//! file descriptor returned by `Inhibit`; sleep proceeds once every such
//! descriptor is closed or `InhibitDelayMaxUSec` has elapsed.

use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedFd, OwnedValue};
use zbus::{Connection, MatchRule};

use super::{Backend, BackendError, BackendResult, Signal, SleepEvent};

const DEST: &str = "org.freedesktop.login1";
const PATH: &str = "/org/freedesktop/login1";
const IFACE: &str = "org.freedesktop.login1.Manager";
const SIGNAL: &str = "PrepareForSleep";
const SIGNAL_NAME: &str = "org.freedesktop.login1.Manager.PrepareForSleep";
const MAX_DELAY_PROPERTY: &str = "InhibitDelayMaxUSec";

const WHO: &str = "nightcap";
const WHY: &str = "Lock screen";

pub(crate) fn match_rule() -> BackendResult<MatchRule<'static>> {
    Ok(MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface(IFACE)?
        .member(SIGNAL)?
        .build())
}

/// Backend talking to `org.freedesktop.login1`
pub struct LogindBackend {
    conn: Connection,
    /// Held delay lock; closing it releases the lock
    lock: Option<OwnedFd>,
}

impl LogindBackend {
    /// Create the backend and take the initial inhibit lock.
    ///
    /// Failing to inhibit means logind is not usable and the next
    /// candidate should be tried.
    pub async fn new(conn: &Connection) -> BackendResult<Self> {
        let mut backend = Self {
            conn: conn.clone(),
            lock: None,
        };
        backend.inhibit().await?;
        Ok(backend)
    }

    async fn inhibit(&mut self) -> BackendResult<()> {
        if self.lock.is_some() {
            warn!("inhibit called twice without closing FD");
            // The old descriptor is not trusted; close it and inhibit anyway
            if let Err(e) = self.release().await {
                warn!("{}", e);
            }
        }

        debug!("inhibit sleep");
        let reply = self
            .conn
            .call_method(
                Some(DEST),
                PATH,
                Some(IFACE),
                "Inhibit",
                &("sleep", WHO, WHY, "delay"),
            )
            .await
            .map_err(|e| BackendError::Inhibit(e.to_string()))?;

        let fd: OwnedFd = reply.body().deserialize().map_err(|e| {
            BackendError::Inhibit(format!("Inhibit returned an invalid value: {}", e))
        })?;

        // The lock must not leak into the command we spawn
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| BackendError::Inhibit(format!("set close-on-exec: {}", e)))?;

        self.lock = Some(fd);
        Ok(())
    }
}

/// Classify a logind signal without side effects.
fn classify_signal(signal: &Signal) -> BackendResult<SleepEvent> {
    if signal.path != PATH || signal.name != SIGNAL_NAME {
        return Err(BackendError::InvalidSignal(signal.clone()));
    }
    match signal.payload {
        Some(true) => Ok(SleepEvent::Sleep),
        Some(false) => Ok(SleepEvent::Wakeup),
        None => Err(BackendError::InvalidSignal(signal.clone())),
    }
}

#[async_trait]
impl Backend for LogindBackend {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn filter(&self) -> String {
        match match_rule() {
            Ok(rule) => rule.to_string(),
            Err(_) => "none".to_string(),
        }
    }

    async fn classify(&mut self, signal: &Signal) -> BackendResult<SleepEvent> {
        let event = classify_signal(signal)?;
        if event == SleepEvent::Wakeup {
            // The lock was consumed by the sleep cycle; take a new one
            self.inhibit().await?;
        }
        Ok(event)
    }

    async fn acquire_inhibit(&mut self) -> BackendResult<()> {
        self.inhibit().await
    }

    async fn release(&mut self) -> BackendResult<()> {
        match self.lock.take() {
            Some(fd) => {
                drop(fd);
                Ok(())
            }
            None => {
                debug!("release called without an inhibit lock held");
                Ok(())
            }
        }
    }

    async fn max_inhibit_hold(&self) -> BackendResult<Option<Duration>> {
        let reply = self
            .conn
            .call_method(
                Some(DEST),
                PATH,
                Some("org.freedesktop.DBus.Properties"),
                "Get",
                &(IFACE, MAX_DELAY_PROPERTY),
            )
            .await
            .map_err(|e| BackendError::Query(e.to_string()))?;

        let value: OwnedValue = reply
            .body()
            .deserialize()
            .map_err(|e| BackendError::Query(e.to_string()))?;
        let usec = u64::try_from(value).map_err(|e| BackendError::Query(e.to_string()))?;

        Ok(Some(Duration::from_micros(usec)))
    }
}
