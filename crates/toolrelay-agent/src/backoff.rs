//! Bounded exponential backoff.
//!
//! An explicit attempt counter rather than a retry callback chain: callers
//! loop on [`Backoff::next_delay`] and stop when it returns `None`.

use std::time::Duration;

use toolrelay_core::RelaySettings;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    pub const fn from_settings(settings: &RelaySettings) -> Self {
        Self::new(
            settings.backoff_base,
            settings.backoff_cap,
            settings.max_reconnect_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once the bound is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// Attempts handed out so far.
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(3), 5);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn default_schedule_starts_at_base() {
        let mut backoff = Backoff::from_settings(&RelaySettings::default());
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn zero_attempts_never_waits() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(10), 0);
        assert_eq!(backoff.next_delay(), None);
    }
}
