//! REST automation gateway library.
//!
//! Translates inbound HTTP requests into events on an asynchronous event bus
//! and bridges the correlated replies back to the waiting HTTP clients.

pub mod admin;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;
pub mod routing;

pub use bus::{EventBus, EventEnvelope, LocalBus, Payload, ServiceError, ServiceHandler, StreamRegistry};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::{AsyncHttpRequest, HttpServer};
pub use lifecycle::Shutdown;
pub use relay::HttpRelay;
