//! Effective inhibit-hold timeout.

use std::time::Duration;

/// Maximum inhibit delay assumed until the backend reports one
pub const DEFAULT_MAX_INHIBIT: Duration = Duration::from_secs(5);

/// Default delay between command exit and lock release
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Whether the reactor waits for the command before releasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Release timing follows the command's exit
    #[default]
    Foreground,
    /// Release after a fixed timeout, independent of the command
    Background,
}

impl RunMode {
    pub fn is_background(self) -> bool {
        self == RunMode::Background
    }
}

/// Reduce `max` by a safety margin of 1/16 to leave room for our own
/// processing; in background mode cap the result to `delay`.
///
/// The margin is at least 1ns so the result stays below any non-zero
/// `max`. A zero `max` gives a zero timeout.
pub fn effective_timeout(max: Duration, delay: Duration, mode: RunMode) -> Duration {
    let margin = (max / 16).max(Duration::from_nanos(1));
    let timeout = max.saturating_sub(margin);
    if mode.is_background() && timeout > delay {
        delay
    } else {
        timeout
    }
}

/// Release delay after a successful foreground run: the configured delay,
/// or whatever is left until the deadline if that is earlier.
pub fn post_command_delay(delay: Duration, timeout: Duration, elapsed: Duration) -> Duration {
    timeout.saturating_sub(elapsed).min(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ceiling_gives_four_point_six_eight_seconds() {
        let t = effective_timeout(DEFAULT_MAX_INHIBIT, DEFAULT_DELAY, RunMode::Foreground);
        assert_eq!(t, Duration::from_micros(4_687_500));
    }

    #[test]
    fn timeout_is_strictly_below_ceiling() {
        for secs in [1u64, 5, 30, 3600] {
            let max = Duration::from_secs(secs);
            let t = effective_timeout(max, DEFAULT_DELAY, RunMode::Foreground);
            assert!(t < max, "{:?} not below {:?}", t, max);
        }
    }

    #[test]
    fn background_caps_to_delay() {
        let t = effective_timeout(
            Duration::from_secs(5),
            Duration::from_millis(500),
            RunMode::Background,
        );
        assert_eq!(t, Duration::from_millis(500));
    }

    #[test]
    fn background_keeps_smaller_timeout() {
        let t = effective_timeout(
            Duration::from_millis(160),
            Duration::from_millis(500),
            RunMode::Background,
        );
        assert_eq!(t, Duration::from_millis(150));
    }

    #[test]
    fn tiny_ceilings_still_get_a_margin() {
        for nanos in [1u64, 2, 15, 16] {
            let max = Duration::from_nanos(nanos);
            let t = effective_timeout(max, DEFAULT_DELAY, RunMode::Foreground);
            assert!(t < max, "{:?} not below {:?}", t, max);
        }
        assert_eq!(
            effective_timeout(Duration::ZERO, DEFAULT_DELAY, RunMode::Foreground),
            Duration::ZERO
        );
    }

    #[test]
    fn post_command_delay_takes_the_earlier() {
        let timeout = Duration::from_secs(4);
        let delay = Duration::from_millis(500);
        assert_eq!(post_command_delay(delay, timeout, Duration::from_secs(1)), delay);
        assert_eq!(
            post_command_delay(delay, timeout, Duration::from_millis(3800)),
            Duration::from_millis(200)
        );
        assert_eq!(post_command_delay(delay, timeout, Duration::from_secs(9)), Duration::ZERO);
    }
}
