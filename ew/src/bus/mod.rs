//! Event bus - live server-push connection with topic fan-out
//!
//! ```text
//! EventTransport ──chunks──▶ ChunkReassembler ──lines──▶ decode_as::<NamedEvent>
//!                                                              │
//!                               SubscriberRegistry::dispatch ◀─┘──▶ tap (broadcast)
//! ```

mod connection;
mod registry;
mod transport;
mod types;

pub use connection::{BusOptions, EventBus};
pub use registry::{Handler, SubscriberRegistry, Subscription, SubscriptionId};
pub use transport::{ChunkStream, EventTransport, HttpEventTransport, TransportError};
pub use types::{ConnectionState, ConnectionStatus, DisconnectReason, NamedEvent};

#[cfg(test)]
pub use transport::mock;
