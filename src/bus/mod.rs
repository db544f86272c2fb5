//! Event bus subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway handler
//!     → EventBus::exists (is the target registered?)
//!     → EventBus::send (envelope with correlation id + reply address)
//!     → service handler runs on its own task
//!     → reply envelope delivered to the reply address
//!     → Correlator completes the waiting HTTP request
//!
//! Large bodies:
//!     HTTP chunks → stream.rs (temp-file backed object stream)
//!     → stream id travels in the request descriptor
//!     → consumer takes the stream exactly once
//! ```
//!
//! # Design Decisions
//! - The gateway depends only on the `EventBus` trait (send, request, exists)
//! - `LocalBus` is the in-process implementation used by the binary and tests
//! - Replies are routed by address, never by holding a handle to the caller

pub mod envelope;
pub mod local;
pub mod stream;

use std::time::Duration;

use async_trait::async_trait;

pub use envelope::{EventEnvelope, Payload};
pub use local::LocalBus;
pub use stream::{ObjectStream, StreamRegistry, StreamWriter};

/// Errors raised by the event bus itself.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No handler is registered under the address.
    #[error("Service {0} not reachable")]
    NotReachable(String),

    /// The envelope has no destination address.
    #[error("Missing destination address")]
    MissingAddress,

    /// No reply arrived within the deadline.
    #[error("Timeout for {0} seconds")]
    Timeout(u64),

    /// The service handled the event and reported a failure.
    #[error("{message}")]
    Remote { status: u16, message: String },
}

/// Failure reported by a service handler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub status: u16,
    pub message: String,
}

impl ServiceError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// A function registered on the bus under an address.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Handle one event and produce a reply envelope.
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError>;
}

/// The three primitives the gateway needs from the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget delivery. A reply, if any, goes to `event.reply_to`.
    async fn send(&self, event: EventEnvelope) -> Result<(), BusError>;

    /// Deliver and wait for the reply.
    async fn request(&self, event: EventEnvelope, timeout: Duration) -> Result<EventEnvelope, BusError>;

    /// Whether a handler is currently registered under `address`.
    async fn exists(&self, address: &str) -> bool;
}
