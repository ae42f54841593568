//! Session - one guard and one bus per signed-in console session
//!
//! Backoff, suppression and subscriber state belong to the session, never to
//! the process, so two sessions cannot see each other's throttling or events.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{EventBus, EventTransport, HttpEventTransport, TransportError};
use crate::config::Config;
use crate::guard::{RateLimitGuard, Sleeper, TokioSleeper};

pub struct Session {
    id: Uuid,
    guard: RateLimitGuard,
    bus: EventBus,
    max_retries: u32,
}

impl Session {
    /// Session over the HTTP event transport described by `config`
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let transport = HttpEventTransport::from_config(&config.server)?;
        Ok(Self::with_transport(config, Arc::new(transport), Arc::new(TokioSleeper)))
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn EventTransport>, sleeper: Arc<dyn Sleeper>) -> Self {
        let id = Uuid::now_v7();
        debug!(session_id = %id, "Session::with_transport: called");
        Self {
            id,
            guard: RateLimitGuard::with_sleeper(config.guard.policy(), config.guard.suppress_ttl(), sleeper.clone()),
            bus: EventBus::with_sleeper(transport, config.bus.options(), sleeper),
            max_retries: config.guard.max_retries,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn guard(&self) -> &RateLimitGuard {
        &self.guard
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Configured retry budget for guarded calls
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Disconnect and forget every subscription, backoff and cached result
    pub fn teardown(&self) {
        info!(session_id = %self.id, "teardown: ending session");
        self.bus.teardown();
        self.guard.clear();
    }
}
