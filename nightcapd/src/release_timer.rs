//! Single-shot release timer.
//!
//! The timer is Idle, Armed, or Fired (deadline reached, expiry not yet
//! consumed). [`ReleaseTimer::arm`] and [`ReleaseTimer::cancel`] always
//! discard a fired-but-unconsumed expiry, so every arming yields at most
//! one release.

use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{self, Instant, Sleep};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed,
    Fired,
}

#[derive(Debug)]
pub struct ReleaseTimer {
    sleep: Pin<Box<Sleep>>,
    state: TimerState,
}

impl Default for ReleaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseTimer {
    pub fn new() -> Self {
        Self {
            sleep: Box::pin(time::sleep_until(Instant::now())),
            state: TimerState::Idle,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Arm the timer to expire `after` from now, replacing any pending expiry.
    pub fn arm(&mut self, after: Duration) {
        self.cancel();
        self.sleep.as_mut().reset(Instant::now() + after);
        self.state = TimerState::Armed;
    }

    /// Disarm the timer, draining an unconsumed expiry.
    ///
    /// Returns the state the timer was in.
    pub fn cancel(&mut self) -> TimerState {
        let prev = self.state;
        if prev == TimerState::Fired {
            debug!("drained stale release timer expiry");
        }
        self.state = TimerState::Idle;
        prev
    }

    /// Complete when the armed deadline is reached. Pending forever while
    /// the timer is not armed. Cancel safe.
    pub async fn expired(&mut self) {
        if self.state != TimerState::Armed {
            future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.state = TimerState::Fired;
    }

    /// Consume a fired expiry. Returns false when there was nothing to
    /// consume, in which case no release must happen.
    pub fn consume(&mut self) -> bool {
        if self.state == TimerState::Fired {
            self.state = TimerState::Idle;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_arming() {
        let mut timer = ReleaseTimer::new();
        timer.arm(Duration::from_millis(100));
        assert_eq!(timer.state(), TimerState::Armed);

        timer.expired().await;
        assert_eq!(timer.state(), TimerState::Fired);
        assert!(timer.consume());
        assert!(!timer.consume());

        // Not armed any more: must not complete again
        assert!(timeout(Duration::from_secs(10), timer.expired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_never_fires() {
        let mut timer = ReleaseTimer::new();
        assert!(timeout(Duration::from_secs(3600), timer.expired()).await.is_err());
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drains_fired_expiry() {
        let mut timer = ReleaseTimer::new();
        timer.arm(Duration::ZERO);
        timer.expired().await;
        assert_eq!(timer.cancel(), TimerState::Fired);
        assert!(!timer.consume());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_discards_stale_expiry() {
        let mut timer = ReleaseTimer::new();
        timer.arm(Duration::ZERO);
        timer.expired().await;

        let start = Instant::now();
        timer.arm(Duration::from_millis(500));
        timer.expired().await;
        assert!(Instant::now() - start >= Duration::from_millis(500));
        assert!(timer.consume());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_deadline_prevents_expiry() {
        let mut timer = ReleaseTimer::new();
        timer.arm(Duration::from_millis(200));
        assert_eq!(timer.cancel(), TimerState::Armed);
        assert!(timeout(Duration::from_secs(1), timer.expired()).await.is_err());
    }
}
