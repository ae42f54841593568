//! Shared HTTP helpers

use reqwest::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tracing::debug;

/// Fallback when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Build a client suited to long-lived streamed responses
///
/// Only the connect phase is bounded; a total request timeout would cut off
/// healthy streams.
pub(crate) fn build_client(connect_timeout: Duration) -> reqwest::Result<Client> {
    debug!(?connect_timeout, "build_client: called");
    Client::builder().connect_timeout(connect_timeout).build()
}

/// Seconds form of Retry-After, or the fallback
pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    let secs = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}
