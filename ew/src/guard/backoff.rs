//! Bounded exponential backoff

use std::time::Duration;

/// Start delay and cap of an exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Fresh state positioned at the initial delay
    pub fn start(&self) -> BackoffState {
        BackoffState {
            attempt_count: 0,
            current_delay: self.initial_delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Backoff progress for one call key or one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub attempt_count: u32,
    pub current_delay: Duration,
}

impl BackoffState {
    /// Take the delay to wait now and move to the next one
    ///
    /// The returned delay never exceeds the cap, and the stored delay doubles
    /// up to the cap, so successive delays are non-decreasing.
    pub fn advance(&mut self, policy: &BackoffPolicy) -> Duration {
        let delay = self.current_delay.min(policy.max_delay);
        self.current_delay = delay.saturating_mul(2).min(policy.max_delay);
        self.attempt_count = self.attempt_count.saturating_add(1);
        delay
    }

    /// Back to the initial delay
    pub fn reset(&mut self, policy: &BackoffPolicy) {
        *self = policy.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_initial_delay() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(8));
        let mut state = policy.start();
        assert_eq!(state.advance(&policy), Duration::from_millis(250));
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.current_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_doubles_then_caps() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5));
        let mut state = policy.start();
        let delays: Vec<_> = (0..6).map(|_| state.advance(&policy).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5, 5]);
    }

    #[test]
    fn test_initial_above_cap_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(3));
        let mut state = policy.start();
        assert_eq!(state.advance(&policy), Duration::from_secs(3));
        assert_eq!(state.advance(&policy), Duration::from_secs(3));
    }

    #[test]
    fn test_reset() {
        let policy = BackoffPolicy::default();
        let mut state = policy.start();
        state.advance(&policy);
        state.advance(&policy);
        state.reset(&policy);
        assert_eq!(state, policy.start());
    }
}
