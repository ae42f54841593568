//! eventwire - real-time event and streaming-response client
//!
//! Turns an unreliable, chunked server-push transport into clean typed events
//! for an admin/chat console.
//!
//! # Modules
//!
//! - [`stream`] - chunk reassembly, frame decoding and the streamed chat client
//! - [`guard`] - rate-limit guard with backoff and short-TTL suppression
//! - [`bus`] - one live event connection fanned out to topic subscribers
//! - [`api`] - minimal JSON API client with throttling detection
//! - [`session`] - per-session bundle of guard and bus
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod api;
pub mod bus;
pub mod cli;
pub mod config;
pub mod guard;
mod http;
pub mod session;
pub mod stream;

// Re-export commonly used types
pub use api::{ApiClient, ApiError};
pub use bus::{
    BusOptions, ConnectionState, ConnectionStatus, DisconnectReason, EventBus, EventTransport, HttpEventTransport,
    NamedEvent, Subscription, TransportError,
};
pub use config::Config;
pub use guard::{BackoffPolicy, BackoffState, RateLimitGuard, Sleeper, Throttled, TokioSleeper};
pub use session::Session;
pub use stream::{ChatClient, ChunkReassembler, DecodeError, StreamError, StreamFrame, StreamSummary};

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Subscriber callbacks run outside every lock, so a poisoned mutex only means
/// a panic elsewhere; the protected maps are still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
