//! UPower backend.
//!
//! Fallback for systems without logind. UPower only announces an
//! imminent sleep with `NotifySleep`; it has no wakeup signal, no inhibit
//! locks and no queryable delay.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use zbus::{Connection, MatchRule};

use super::{Backend, BackendError, BackendResult, Signal, SleepEvent};

const DEST: &str = "org.freedesktop.UPower";
const PATH: &str = "/org/freedesktop/UPower";
const IFACE: &str = "org.freedesktop.UPower";
const SIGNAL: &str = "NotifySleep";
const SIGNAL_NAME: &str = "org.freedesktop.UPower.NotifySleep";

pub(crate) fn match_rule() -> BackendResult<MatchRule<'static>> {
    Ok(MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface(IFACE)?
        .member(SIGNAL)?
        .build())
}

/// Backend talking to `org.freedesktop.UPower`
#[derive(Debug)]
pub struct UPowerBackend;

impl UPowerBackend {
    /// Probe UPower by calling `SuspendAllowed`.
    pub async fn new(conn: &Connection) -> BackendResult<Self> {
        conn.call_method(Some(DEST), PATH, Some(IFACE), "SuspendAllowed", &())
            .await?;
        Ok(Self)
    }
}

fn classify_signal(signal: &Signal) -> BackendResult<SleepEvent> {
    if signal.path == PATH && signal.name == SIGNAL_NAME {
        Ok(SleepEvent::Sleep)
    } else {
        Err(BackendError::InvalidSignal(signal.clone()))
    }
}

#[async_trait]
impl Backend for UPowerBackend {
    fn name(&self) -> &'static str {
        "UPower"
    }

    fn filter(&self) -> String {
        match match_rule() {
            Ok(rule) => rule.to_string(),
            Err(_) => "none".to_string(),
        }
    }

    async fn classify(&mut self, signal: &Signal) -> BackendResult<SleepEvent> {
        classify_signal(signal)
    }

    async fn acquire_inhibit(&mut self) -> BackendResult<()> {
        Ok(())
    }

    async fn release(&mut self) -> BackendResult<()> {
        debug!("release requested, UPower holds no inhibit lock");
        Ok(())
    }

    async fn max_inhibit_hold(&self) -> BackendResult<Option<Duration>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn notify_sleep_is_sleep_regardless_of_payload() {
        for payload in [None, Some(true), Some(false)] {
            let sig = Signal::new(PATH, SIGNAL_NAME, payload);
            assert_eq!(classify_signal(&sig).unwrap(), SleepEvent::Sleep);
        }
    }

    #[test]
    fn other_signals_are_invalid() {
        let sig = Signal::new(PATH, "org.freedesktop.UPower.Resuming", None);
        assert!(classify_signal(&sig).is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn has_no_ceiling_and_release_is_a_no_op() {
        let mut backend = UPowerBackend;
        assert_eq!(backend.max_inhibit_hold().await.unwrap(), None);
        assert!(backend.release().await.is_ok());
        assert!(logs_contain("UPower holds no inhibit lock"));
        assert!(backend.acquire_inhibit().await.is_ok());
    }
}
