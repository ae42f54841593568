//! Rate-limit guard for outbound calls
//!
//! A [`RateLimitGuard`] sits in front of any async call that returns
//! `Result<T, E>` where `E` can say whether it was a throttling response. It
//! retries throttled calls with bounded exponential backoff and can suppress
//! repeats of a recent success.

mod backoff;
mod limiter;
mod sleeper;

pub use backoff::{BackoffPolicy, BackoffState};
pub use limiter::RateLimitGuard;
pub use sleeper::{Sleeper, TokioSleeper};

#[cfg(test)]
pub use sleeper::mock;

/// Errors that can signal throttling (HTTP 429 or equivalent)
pub trait Throttled {
    fn is_throttled(&self) -> bool;
}
