//! RateLimitGuard - suppression and backoff for named outbound calls

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::backoff::{BackoffPolicy, BackoffState};
use super::sleeper::{Sleeper, TokioSleeper};
use super::Throttled;
use crate::lock;

/// A cached success, type-erased so one guard can serve many call shapes
struct CachedResult {
    stored_at: Instant,
    value: Box<dyn Any + Send + Sync>,
}

/// Wraps outbound calls identified by a caller-chosen key
///
/// Backoff state is kept per key and survives between invocations until the
/// next success for that key. Retry counts are per invocation.
pub struct RateLimitGuard {
    policy: BackoffPolicy,
    suppress_ttl: Duration,
    sleeper: Arc<dyn Sleeper>,
    backoff: Mutex<HashMap<String, BackoffState>>,
    cache: Mutex<HashMap<String, CachedResult>>,
}

impl RateLimitGuard {
    pub fn new(policy: BackoffPolicy, suppress_ttl: Duration) -> Self {
        Self::with_sleeper(policy, suppress_ttl, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: BackoffPolicy, suppress_ttl: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        debug!(?policy, ?suppress_ttl, "RateLimitGuard::with_sleeper: called");
        Self {
            policy,
            suppress_ttl,
            sleeper,
            backoff: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Invoke `call`, retrying throttling failures with exponential backoff
    ///
    /// Throttled failures are retried while this invocation has retried fewer
    /// than `max_retries` times. Any other failure, or a throttled failure once
    /// retries are exhausted, is returned unchanged. Success clears the stored
    /// backoff for `key`.
    pub async fn guard<T, E, F, Fut>(&self, key: &str, max_retries: u32, mut call: F) -> Result<T, E>
    where
        E: Throttled,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        debug!(key, max_retries, "guard: called");
        let mut retries = 0u32;

        loop {
            match call().await {
                Ok(value) => {
                    if lock(&self.backoff).remove(key).is_some() {
                        debug!(key, "guard: success, backoff cleared");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_throttled() && retries < max_retries => {
                    let delay = {
                        let mut backoff = lock(&self.backoff);
                        backoff
                            .entry(key.to_string())
                            .or_insert_with(|| self.policy.start())
                            .advance(&self.policy)
                    };
                    retries += 1;
                    warn!(
                        key,
                        retry = retries,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "guard: throttled, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => {
                    if e.is_throttled() {
                        warn!(key, retries, "guard: throttled, retries exhausted");
                    } else {
                        debug!(key, "guard: non-throttling failure");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Like `guard`, but an identical key that succeeded within the
    /// suppression TTL returns the cached value without calling out
    ///
    /// Only successes are cached. A failure drops any cached entry for the key.
    /// Calls still in flight are not tracked, so two overlapping invocations
    /// both call out. Storing a success prunes every expired entry.
    pub async fn guard_cached<T, E, F, Fut>(&self, key: &str, max_retries: u32, call: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: Throttled,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cached::<T>(key) {
            debug!(key, "guard_cached: suppressed, returning cached result");
            return Ok(value);
        }

        match self.guard(key, max_retries, call).await {
            Ok(value) => {
                let mut cache = lock(&self.cache);
                let before = cache.len();
                cache.retain(|_, entry| entry.stored_at.elapsed() < self.suppress_ttl);
                if cache.len() < before {
                    debug!(key, pruned = before - cache.len(), "guard_cached: pruned expired entries");
                }
                cache.insert(
                    key.to_string(),
                    CachedResult {
                        stored_at: Instant::now(),
                        value: Box::new(value.clone()),
                    },
                );
                Ok(value)
            }
            Err(e) => {
                lock(&self.cache).remove(key);
                Err(e)
            }
        }
    }

    fn cached<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let mut cache = lock(&self.cache);
        let fresh = cache.get(key).map(|entry| entry.stored_at.elapsed() < self.suppress_ttl)?;
        if !fresh {
            cache.remove(key);
            return None;
        }
        cache.get(key).and_then(|entry| entry.value.downcast_ref::<T>().cloned())
    }

    /// Current backoff for `key`, if it has been throttled since its last success
    pub fn backoff_state(&self, key: &str) -> Option<BackoffState> {
        lock(&self.backoff).get(key).copied()
    }

    /// Drop all backoff and suppression state
    pub fn clear(&self) {
        debug!("RateLimitGuard::clear: called");
        lock(&self.backoff).clear();
        lock(&self.cache).clear();
    }
}

impl std::fmt::Debug for RateLimitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitGuard")
            .field("policy", &self.policy)
            .field("suppress_ttl", &self.suppress_ttl)
            .field("backoff_keys", &lock(&self.backoff).len())
            .field("cached_keys", &lock(&self.cache).len())
            .finish()
    }
}
