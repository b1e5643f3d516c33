//! Scripted backend for testing.
//!
//! Reads single-byte commands from a stream (stdin in the daemon):
//!
//! ```text
//!   s  sleep signal received
//!   w  wakeup signal received
//!   e  running command exits with status 0
//!   k  running command killed
//! ```
//!
//! Other bytes are ignored. `e` and `k` do nothing unless a command is
//! running. No process is ever spawned: [`ScriptLauncher`] registers the
//! run with the driver task instead, and the driver reports its outcome
//! when `e` or `k` arrives.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::dbus::SIGNAL_QUEUE;
use super::{Backend, BackendError, BackendResult, Signal, SleepEvent};
use crate::runner::{Launcher, Outcome, RunnerError, RunnerResult, TerminationSender};

const PATH: &str = "/nightcap/script";
const SLEEP_NAME: &str = "nightcap.Script.Sleep";
const WAKEUP_NAME: &str = "nightcap.Script.Wakeup";

/// Backend driven by a command stream
#[derive(Debug, Default)]
pub struct ScriptBackend {
    inhibited: bool,
}

impl ScriptBackend {
    /// Start the driver task reading `reader`.
    ///
    /// Returns the backend (already inhibiting, like logind after its
    /// probe), the signal channel and the launcher to give the reactor.
    pub fn spawn<R>(reader: R) -> (Self, mpsc::Receiver<Signal>, ScriptLauncher)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE);
        let (start_tx, start_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(reader, signal_tx, start_rx));

        let mut backend = Self::default();
        backend.inhibit();
        (backend, signal_rx, ScriptLauncher { start_tx })
    }

    pub fn sleep_signal() -> Signal {
        Signal::new(PATH, SLEEP_NAME, None)
    }

    pub fn wakeup_signal() -> Signal {
        Signal::new(PATH, WAKEUP_NAME, None)
    }

    pub fn is_inhibited(&self) -> bool {
        self.inhibited
    }

    fn inhibit(&mut self) {
        if self.inhibited {
            info!("wakeup received while sleep inhibited");
        }
        debug!("inhibit sleep");
        self.inhibited = true;
    }
}

#[async_trait]
impl Backend for ScriptBackend {
    fn name(&self) -> &'static str {
        "script"
    }

    fn filter(&self) -> String {
        "none".to_string()
    }

    async fn classify(&mut self, signal: &Signal) -> BackendResult<SleepEvent> {
        if signal.path != PATH {
            return Err(BackendError::InvalidSignal(signal.clone()));
        }
        match signal.name.as_str() {
            SLEEP_NAME => Ok(SleepEvent::Sleep),
            WAKEUP_NAME => {
                self.inhibit();
                Ok(SleepEvent::Wakeup)
            }
            _ => Err(BackendError::InvalidSignal(signal.clone())),
        }
    }

    async fn acquire_inhibit(&mut self) -> BackendResult<()> {
        self.inhibit();
        Ok(())
    }

    async fn release(&mut self) -> BackendResult<()> {
        if !self.inhibited {
            debug!("release called without an inhibit lock held");
        }
        self.inhibited = false;
        Ok(())
    }

    async fn max_inhibit_hold(&self) -> BackendResult<Option<Duration>> {
        Ok(None)
    }
}

/// Launcher handing each run to the script driver
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    start_tx: mpsc::UnboundedSender<TerminationSender>,
}

impl Launcher for ScriptLauncher {
    fn launch(&mut self, done: TerminationSender) -> RunnerResult<()> {
        self.start_tx.send(done).map_err(|_| {
            RunnerError::SpawnFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "script driver stopped",
            ))
        })
    }
}

/// Feed control bytes to the reactor one at a time.
///
/// A byte is only acted on once the reactor has handled the previous
/// one: after an `s` that starts the command the driver waits for the
/// run to be registered, and after `e` or `k` it waits until the reactor
/// has taken the outcome. Bytes arriving in one read therefore behave
/// exactly like bytes arriving one by one.
async fn drive<R>(
    mut reader: R,
    signal_tx: mpsc::Sender<Signal>,
    mut start_rx: mpsc::UnboundedReceiver<TerminationSender>,
) where
    R: AsyncRead + Unpin,
{
    let mut running: Option<TerminationSender> = None;
    let mut buf = [0u8; 16];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!("read failed: {}", e);
                break;
            }
        };
        for &byte in &buf[..n] {
            match byte {
                b's' => {
                    if signal_tx.send(ScriptBackend::sleep_signal()).await.is_err() {
                        return;
                    }
                    // With nothing running the reactor launches
                    if running.is_none() {
                        match start_rx.recv().await {
                            Some(done) => running = Some(done),
                            None => return,
                        }
                    }
                }
                b'w' => {
                    if signal_tx.send(ScriptBackend::wakeup_signal()).await.is_err() {
                        return;
                    }
                }
                b'e' | b'k' => {
                    let Some(done) = running.take() else {
                        debug!("no command running, {:?} ignored", byte as char);
                        continue;
                    };
                    let outcome = if byte == b'e' {
                        Outcome::Success
                    } else {
                        Outcome::Killed(None)
                    };
                    if !done.deliver_and_wait(outcome).await {
                        return;
                    }
                }
                _ => {}
            }
        }
    }
    debug!("script stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandRunner;

    #[tokio::test]
    async fn classifies_its_own_signals() {
        let mut backend = ScriptBackend::default();
        assert_eq!(
            backend.classify(&ScriptBackend::sleep_signal()).await.unwrap(),
            SleepEvent::Sleep
        );
        assert!(!backend.is_inhibited());
        assert_eq!(
            backend.classify(&ScriptBackend::wakeup_signal()).await.unwrap(),
            SleepEvent::Wakeup
        );
        assert!(backend.is_inhibited());
    }

    #[tokio::test]
    async fn rejects_foreign_signals() {
        let mut backend = ScriptBackend::default();
        let foreign = Signal::new("/org/freedesktop/login1", SLEEP_NAME, Some(true));
        assert!(matches!(
            backend.classify(&foreign).await,
            Err(BackendError::InvalidSignal(_))
        ));
    }

    #[tokio::test]
    async fn release_clears_inhibit() {
        let (mut backend, _signals, _launcher) = ScriptBackend::spawn(tokio::io::empty());
        assert!(backend.is_inhibited());
        backend.release().await.unwrap();
        assert!(!backend.is_inhibited());
        backend.release().await.unwrap();
        assert_eq!(backend.max_inhibit_hold().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_bytes_become_signals() {
        let (_backend, mut signals, _launcher) = ScriptBackend::spawn(&b"wxw\n"[..]);
        assert_eq!(signals.recv().await, Some(ScriptBackend::wakeup_signal()));
        assert_eq!(signals.recv().await, Some(ScriptBackend::wakeup_signal()));
        assert_eq!(signals.recv().await, None);
    }

    #[tokio::test]
    async fn exit_in_same_chunk_as_sleep_reaches_the_run() {
        let (_backend, mut signals, launcher) = ScriptBackend::spawn(&b"sew"[..]);
        let mut runner = CommandRunner::new(Box::new(launcher));

        assert_eq!(signals.recv().await, Some(ScriptBackend::sleep_signal()));
        runner.start().unwrap();
        assert_eq!(runner.terminated().await, Some(Outcome::Success));
        assert!(runner.mark_stopped());
        assert_eq!(signals.recv().await, Some(ScriptBackend::wakeup_signal()));
        assert_eq!(signals.recv().await, None);
    }
}
