//! Injectable delay source

use async_trait::async_trait;
use std::time::Duration;

/// Something that can wait without blocking the runtime
///
/// Retry and reconnect delays go through this so they can be observed and
/// driven in tests without a wall clock.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
