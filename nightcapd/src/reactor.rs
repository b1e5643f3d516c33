//! The sleep reactor event loop.
//!
//! The reactor owns all mutable state and waits on three sources: backend
//! signals, the release timer and command termination. State is the pair
//! (running, locked): `running` is true while a command runs, `locked`
//! while the release timer is armed.
//!
//! ```text
//!   event                   change    (R,L) = f,f  f,T  T,f  T,T
//!   sleep, exec ok          R=T L=T           [a]  [a]   -    -
//!   sleep, exec failed          L=T           [b]  [b]   -    -
//!   sleep (no exec)             L=T            -    -   [b]
//!   wakeup, inhibit ok          L=f                [c]       [c]
//!   release timer expired       L=f            -   [d]   -   [d]
//!   command terminated      R=f                -    -        [e]
//!
//!   [a] arm release timer to timeout, deadline = now + timeout
//!   [b] arm release timer to expire immediately
//!   [c] disarm release timer
//!   [d] release the inhibit lock
//!   [e] foreground only: exit 0 arms the timer to min(delay, deadline),
//!       anything else arms it to expire immediately
//! ```

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{Backend, Signal, SleepEvent};
use crate::error::{ReactorError, ReactorResult};
use crate::release_timer::ReleaseTimer;
use crate::runner::{CommandRunner, Launcher, Outcome};
use crate::timeout::{self, RunMode, DEFAULT_DELAY, DEFAULT_MAX_INHIBIT};

/// Immutable reactor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Delay between command exit and lock release
    pub delay: Duration,
    /// Foreground or background command mode
    pub mode: RunMode,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            mode: RunMode::Foreground,
        }
    }
}

/// One event taken off the reactor's sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Signal(Signal),
    ReleaseTimerExpired,
    CommandTerminated(Outcome),
}

/// Observable reactor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub running: bool,
    pub locked: bool,
    pub timeout: Duration,
}

#[derive(Debug)]
struct ReactorState {
    /// Release timer armed
    locked: bool,
    /// Launch time of the current command (foreground mode)
    start: Instant,
    /// Effective inhibit-hold timeout
    timeout: Duration,
}

pub struct Reactor {
    config: ReactorConfig,
    backend: Box<dyn Backend>,
    signals: mpsc::Receiver<Signal>,
    runner: CommandRunner,
    timer: ReleaseTimer,
    state: ReactorState,
}

impl Reactor {
    pub fn new(
        config: ReactorConfig,
        backend: Box<dyn Backend>,
        signals: mpsc::Receiver<Signal>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        // Until the backend reports its ceiling, assume the default one
        let timeout = timeout::effective_timeout(DEFAULT_MAX_INHIBIT, config.delay, config.mode);
        debug!(?timeout, "initial timeout");
        Self {
            config,
            backend,
            signals,
            runner: CommandRunner::new(launcher),
            timer: ReleaseTimer::new(),
            state: ReactorState {
                locked: false,
                start: Instant::now(),
                timeout,
            },
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            running: self.runner.is_running(),
            locked: self.state.locked,
            timeout: self.state.timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run the event loop until the signal source goes away.
    pub async fn run(&mut self) -> ReactorResult<()> {
        loop {
            self.step().await?;
        }
    }

    /// Wait for one event and handle it.
    pub async fn step(&mut self) -> ReactorResult<Event> {
        let event = self.next_event().await?;
        self.handle(event.clone()).await;
        Ok(event)
    }

    /// Wait for the next event from any of the three sources.
    ///
    /// Signals are polled first, so a wakeup queued behind a due release
    /// still cancels it.
    pub async fn next_event(&mut self) -> ReactorResult<Event> {
        tokio::select! {
            biased;

            signal = self.signals.recv() => {
                signal.map(Event::Signal).ok_or(ReactorError::SignalSourceClosed)
            }
            _ = self.timer.expired() => Ok(Event::ReleaseTimerExpired),
            Some(outcome) = self.runner.terminated() => Ok(Event::CommandTerminated(outcome)),
        }
    }

    pub async fn handle(&mut self, event: Event) {
        match event {
            Event::Signal(signal) => self.on_signal(signal).await,
            Event::ReleaseTimerExpired => self.on_release_timer().await,
            Event::CommandTerminated(outcome) => self.on_terminated(outcome),
        }
    }

    /// Drop any pending release and give up the inhibit lock.
    pub async fn shutdown(&mut self) {
        self.timer.cancel();
        self.state.locked = false;
        if let Err(e) = self.backend.release().await {
            warn!("{}.release: {}", self.backend.name(), e);
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        debug!("signal received: {}", signal);
        match self.backend.classify(&signal).await {
            // Wakeup whose re-inhibit failed, or a foreign signal
            Err(e) => warn!("{}.classify: {}", self.backend.name(), e),
            Ok(SleepEvent::Wakeup) => {
                debug!("wakeup");
                // The old lock is gone and a new one is held; a pending
                // release would drop the new one
                if self.state.locked {
                    self.timer.cancel();
                    self.state.locked = false;
                }
            }
            Ok(SleepEvent::Sleep) => self.on_sleep().await,
        }
    }

    async fn on_sleep(&mut self) {
        if self.runner.is_running() {
            info!("exec: already running");
            // Keep waiting on an armed timer, otherwise release right away
            if !self.state.locked {
                self.state.locked = true;
                self.timer.arm(Duration::ZERO);
            }
            return;
        }

        if !self.config.mode.is_background() {
            self.state.start = Instant::now();
        }
        self.timer.cancel();
        self.state.locked = true;

        debug!("running command");
        if let Err(e) = self.runner.start() {
            warn!("{}", e);
            self.timer.arm(Duration::ZERO);
            return;
        }

        self.update_timeout().await;
        self.timer.arm(self.state.timeout);
    }

    async fn update_timeout(&mut self) {
        match self.backend.max_inhibit_hold().await {
            Ok(Some(max)) => {
                let timeout = timeout::effective_timeout(max, self.config.delay, self.config.mode);
                if timeout != self.state.timeout {
                    self.state.timeout = timeout;
                    debug!(?timeout, "timeout updated");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{}.max_inhibit_hold: {}", self.backend.name(), e),
        }
    }

    async fn on_release_timer(&mut self) {
        if !self.timer.consume() {
            return;
        }
        self.state.locked = false;
        if self.runner.is_running() && !self.config.mode.is_background() {
            warn!("command timed out, consider using --background");
        }
        debug!("releasing inhibit lock");
        if let Err(e) = self.backend.release().await {
            warn!("{}.release: {}", self.backend.name(), e);
        }
    }

    fn on_terminated(&mut self, outcome: Outcome) {
        if !self.runner.mark_stopped() {
            info!("wait: not running");
            return;
        }
        if !outcome.is_success() {
            info!("wait: {}", outcome);
        }
        debug!("command finished");

        if self.state.locked && !self.config.mode.is_background() {
            // Finished before the timeout
            self.timer.cancel();
            let delay = if outcome.is_success() {
                timeout::post_command_delay(
                    self.config.delay,
                    self.state.timeout,
                    self.state.start.elapsed(),
                )
            } else {
                Duration::ZERO
            };
            self.timer.arm(delay);
        }
    }
}
