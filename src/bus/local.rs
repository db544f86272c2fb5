//! In-process event bus.
//!
//! # Responsibilities
//! - Register service handlers by address
//! - Deliver fire-and-forget events on their own task
//! - Route replies to the `reply_to` address with the original correlation id
//! - Request/response with a deadline

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::bus::{BusError, EventBus, EventEnvelope, ServiceHandler};

/// Handler registry keyed by address.
#[derive(Default, Clone)]
pub struct LocalBus {
    services: Arc<DashMap<String, Arc<dyn ServiceHandler>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `address`.
    pub fn register(&self, address: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        let address = address.into();
        tracing::info!(service = %address, "Service registered");
        self.services.insert(address, handler);
    }

    fn handler(&self, address: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.services.get(address).map(|h| Arc::clone(h.value()))
    }

    fn deliver_reply(&self, reply_to: String, reply: EventEnvelope) {
        match self.handler(&reply_to) {
            Some(sink) => {
                tokio::spawn(async move {
                    if let Err(e) = sink.handle(reply).await {
                        tracing::warn!(reply_to = %reply_to, error = %e, "Reply handler failed");
                    }
                });
            }
            None => {
                tracing::warn!(reply_to = %reply_to, "Dropping reply for unknown address");
            }
        }
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn send(&self, event: EventEnvelope) -> Result<(), BusError> {
        let to = event.to.clone().ok_or(BusError::MissingAddress)?;
        let handler = self.handler(&to).ok_or_else(|| BusError::NotReachable(to.clone()))?;

        tracing::trace!(to = %to, id = %event.id, trace_id = ?event.trace_id, "Event sent");

        let bus = self.clone();
        tokio::spawn(async move {
            let reply_to = event.reply_to.clone();
            let correlation_id = event.correlation_id.clone();
            let outcome = handler.handle(event).await;

            let Some(reply_to) = reply_to else {
                if let Err(e) = outcome {
                    tracing::warn!(service = %to, error = %e, "Service failed without reply address");
                }
                return;
            };

            let mut reply = match outcome {
                Ok(reply) => reply,
                Err(e) => EventEnvelope::error(e.status, e.message),
            };
            reply.to = Some(reply_to.clone());
            reply.from = Some(to);
            reply.reply_to = None;
            reply.correlation_id = correlation_id;
            bus.deliver_reply(reply_to, reply);
        });
        Ok(())
    }

    async fn request(&self, event: EventEnvelope, timeout: Duration) -> Result<EventEnvelope, BusError> {
        let to = event.to.clone().ok_or(BusError::MissingAddress)?;
        let handler = self.handler(&to).ok_or_else(|| BusError::NotReachable(to.clone()))?;
        let correlation_id = event.correlation_id.clone();

        match tokio::time::timeout(timeout, handler.handle(event)).await {
            Ok(Ok(mut reply)) => {
                reply.from = Some(to);
                reply.correlation_id = correlation_id;
                Ok(reply)
            }
            Ok(Err(e)) => Err(BusError::Remote {
                status: e.status,
                message: e.message,
            }),
            Err(_) => Err(BusError::Timeout(timeout.as_secs())),
        }
    }

    async fn exists(&self, address: &str) -> bool {
        self.services.contains_key(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Payload, ServiceError};
    use tokio::sync::mpsc;

    struct Echo;

    #[async_trait]
    impl ServiceHandler for Echo {
        async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
            Ok(EventEnvelope::reply(event.body))
        }
    }

    struct Failing;

    #[async_trait]
    impl ServiceHandler for Failing {
        async fn handle(&self, _event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
            Err(ServiceError::new(400, "bad input"))
        }
    }

    struct Sink(mpsc::UnboundedSender<EventEnvelope>);

    #[async_trait]
    impl ServiceHandler for Sink {
        async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
            let _ = self.0.send(event);
            Ok(EventEnvelope::default())
        }
    }

    #[tokio::test]
    async fn send_routes_reply_with_correlation_id() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register("hello.echo", Arc::new(Echo));
        bus.register("reply.sink", Arc::new(Sink(tx)));

        let event = EventEnvelope::new("hello.echo")
            .with_body(Payload::Text("hi".into()))
            .with_correlation_id("c-1")
            .with_reply_to("reply.sink");
        bus.send(event).await.unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(reply.body, Payload::Text("hi".into()));
        assert_eq!(reply.from.as_deref(), Some("hello.echo"));
    }

    #[tokio::test]
    async fn failure_becomes_error_reply() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register("hello.fail", Arc::new(Failing));
        bus.register("reply.sink", Arc::new(Sink(tx)));

        let event = EventEnvelope::new("hello.fail")
            .with_correlation_id("c-2")
            .with_reply_to("reply.sink");
        bus.send(event).await.unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body, Payload::Text("bad input".into()));
    }

    #[tokio::test]
    async fn unknown_address_is_not_reachable() {
        let bus = LocalBus::new();
        assert!(!bus.exists("no.such").await);
        let err = bus.send(EventEnvelope::new("no.such")).await.unwrap_err();
        assert!(matches!(err, BusError::NotReachable(ref s) if s == "no.such"));
    }

    #[tokio::test]
    async fn request_maps_service_error() {
        let bus = LocalBus::new();
        bus.register("hello.fail", Arc::new(Failing));
        let err = bus
            .request(EventEnvelope::new("hello.fail"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Remote { status: 400, .. }));
    }
}
