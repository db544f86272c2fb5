//! Pending-request table.
//!
//! # Responsibilities
//! - Bind a correlation id to the HTTP request waiting for its reply
//! - Complete the waiter when the reply envelope arrives
//! - Remove the entry on every exit path (reply, error, timeout, disconnect)
//!
//! # Design Decisions
//! - The waiter owns a guard; dropping it removes the entry
//! - Replies for unknown or already completed ids are dropped with a debug log
//! - The table is the reply sink registered on the bus

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::bus::{EventEnvelope, ServiceError, ServiceHandler};
use crate::error::GatewayError;
use crate::observability::metrics;

struct PendingRequest {
    method: String,
    url: String,
    response_transform_id: Option<String>,
    created: Instant,
    reply: oneshot::Sender<EventEnvelope>,
}

/// In-flight entry as reported by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub correlation_id: String,
    pub method: String,
    pub url: String,
    pub response_transform_id: Option<String>,
    pub age_ms: u64,
}

/// Correlation id -> waiting HTTP request.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<String, PendingRequest>,
}

/// Receiving half of a registered request.
pub struct PendingReply {
    id: String,
    reply: Option<oneshot::Receiver<EventEnvelope>>,
    correlator: Arc<Correlator>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry under a fresh correlation id.
    pub fn register(
        self: &Arc<Self>,
        method: &str,
        url: &str,
        response_transform_id: Option<String>,
    ) -> PendingReply {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                url: url.to_string(),
                response_transform_id,
                created: Instant::now(),
                reply: tx,
            },
        );
        metrics::set_pending_requests(self.pending.len());
        PendingReply {
            id,
            reply: Some(rx),
            correlator: Arc::clone(self),
        }
    }

    /// Hand a reply to its waiter. Returns false if nobody is waiting.
    pub fn complete(&self, reply: EventEnvelope) -> bool {
        let Some(id) = reply.correlation_id.clone() else {
            tracing::debug!(from = ?reply.from, "Reply without correlation id dropped");
            return false;
        };
        let Some((_, entry)) = self.pending.remove(&id) else {
            tracing::debug!(correlation_id = %id, "Reply for unknown request dropped");
            return false;
        };
        metrics::set_pending_requests(self.pending.len());
        tracing::debug!(
            correlation_id = %id,
            method = %entry.method,
            url = %entry.url,
            elapsed_ms = entry.created.elapsed().as_millis() as u64,
            "Reply received"
        );
        entry.reply.send(reply).is_ok()
    }

    fn remove(&self, id: &str) {
        if self.pending.remove(id).is_some() {
            metrics::set_pending_requests(self.pending.len());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// In-flight entries, oldest first.
    pub fn snapshot(&self) -> Vec<PendingSummary> {
        let mut rows: Vec<PendingSummary> = self
            .pending
            .iter()
            .map(|e| PendingSummary {
                correlation_id: e.key().clone(),
                method: e.method.clone(),
                url: e.url.clone(),
                response_transform_id: e.response_transform_id.clone(),
                age_ms: e.created.elapsed().as_millis() as u64,
            })
            .collect();
        rows.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        rows
    }
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply. The entry is removed whatever the outcome.
    pub async fn wait(mut self, timeout: Duration) -> Result<EventEnvelope, GatewayError> {
        let Some(rx) = self.reply.take() else {
            return Err(GatewayError::Internal("reply already consumed".to_string()));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatewayError::Internal("reply channel closed".to_string())),
            Err(_) => Err(GatewayError::Timeout(timeout.as_secs())),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.remove(&self.id);
    }
}

#[async_trait]
impl ServiceHandler for Correlator {
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        self.complete(event);
        Ok(EventEnvelope::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Payload;

    #[tokio::test]
    async fn reply_completes_waiter_and_removes_entry() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register("GET", "/api/hello", None);
        let id = pending.id().to_string();
        assert!(correlator.contains(&id));

        let reply = EventEnvelope::reply(Payload::Text("ok".into())).with_correlation_id(id.clone());
        assert!(correlator.complete(reply));
        let got = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.body, Payload::Text("ok".into()));
        assert!(correlator.is_empty());

        let late = EventEnvelope::reply(Payload::Empty).with_correlation_id(id);
        assert!(!correlator.complete(late));
    }

    #[tokio::test]
    async fn timeout_removes_entry() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register("POST", "/api/slow", Some("h1".into()));
        assert_eq!(correlator.snapshot()[0].response_transform_id.as_deref(), Some("h1"));
        let err = pending.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn dropped_waiter_removes_entry() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register("GET", "/a", None);
        assert_eq!(correlator.len(), 1);
        drop(pending);
        assert!(correlator.is_empty());
    }
}
