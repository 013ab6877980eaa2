//! Capped exponential backoff for stream reconnects

use std::time::Duration;

use crate::config::BackoffConfig;

/// `delay = min(base^attempt, cap)` seconds
///
/// `attempt` grows by one per computed delay and goes back to zero once a
/// connection has been opened successfully.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: u32,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: u32, cap: Duration) -> Self {
        Self {
            base: base.max(1),
            cap,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt, without advancing
    pub fn peek(&self) -> Duration {
        let secs = (self.base as u64)
            .checked_pow(self.attempt)
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }

    /// Delay before the next reconnect; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// A connection was opened; start over from `base^0`
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.base, Duration::from_secs(config.max_delay_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_doubling_sequence() {
        let mut backoff = Backoff::new(2, Duration::from_secs(300));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_cap_holds_without_overflow() {
        let mut backoff = Backoff::new(2, Duration::from_secs(300));
        for _ in 0..200 {
            assert!(backoff.next_delay() <= Duration::from_secs(300));
        }
        assert_eq!(backoff.peek(), Duration::from_secs(300));
    }

    #[test]
    fn test_reset_returns_to_base_zero() {
        let mut backoff = Backoff::new(2, Duration::from_secs(300));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_config_defaults() {
        let backoff = Backoff::from(&BackoffConfig::default());
        assert_eq!(backoff.peek(), Duration::from_secs(1));
        assert_eq!(backoff.cap, Duration::from_secs(300));
    }

    proptest! {
        #[test]
        fn prop_nth_delay_is_base_pow_n(base in 1u32..6, n in 0u32..12) {
            let mut backoff = Backoff::new(base, Duration::from_secs(u64::MAX));
            for _ in 0..n {
                backoff.next_delay();
            }
            prop_assert_eq!(backoff.next_delay().as_secs(), (base as u64).pow(n));
        }
    }
}
