//! Authentication service selection and invocation.
//!
//! # Responsibilities
//! - Pick the auth service for a request from header overrides or the default
//! - Call it with the assembled request before the primary service
//! - Turn its verdict into a session map or a 401
//!
//! # Design Decisions
//! - Headers are scanned in declaration order; the first override found wins
//! - For one header, an exact (header, value) override beats a wildcard one
//! - Only a truthy reply body lets the request through

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::HeaderMap;

use crate::bus::{EventBus, EventEnvelope, Payload};
use crate::error::GatewayError;
use crate::http::request::AsyncHttpRequest;
use crate::observability::metrics;
use crate::routing::RouteInfo;

/// The auth service for this request, if the route requires one.
pub fn select_auth_service(info: &RouteInfo, headers: &HeaderMap) -> Option<String> {
    let default = info.default_auth_service.as_ref()?;
    for header in &info.auth_headers {
        let Some(value) = headers.get(header.as_str()).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let service = info
            .scoped_auth_service(header, value)
            .or_else(|| info.any_value_auth_service(header));
        if let Some(service) = service {
            return Some(service.to_string());
        }
    }
    Some(default.clone())
}

/// Ask `service` whether the request may proceed.
///
/// On success the reply headers are returned as the session.
pub async fn authenticate(
    bus: &dyn EventBus,
    service: &str,
    request: &AsyncHttpRequest,
    timeout: Duration,
) -> Result<BTreeMap<String, String>, GatewayError> {
    let event = EventEnvelope::new(service).with_body(Payload::HttpRequest(Box::new(request.clone())));

    let reply = match bus.request(event, timeout).await {
        Ok(reply) => reply,
        Err(e) => {
            metrics::record_auth("error");
            tracing::warn!(auth_service = %service, error = %e, "Authentication failed");
            return Err(GatewayError::Unauthorized(e.to_string()));
        }
    };

    if !reply.is_error() && reply.body.is_truthy() {
        metrics::record_auth("allowed");
        return Ok(reply.headers.into_iter().collect());
    }

    metrics::record_auth("denied");
    let message = match &reply.body {
        Payload::Empty | Payload::Bool(_) => "Unauthorized".to_string(),
        other => other.as_message(),
    };
    tracing::debug!(auth_service = %service, status = reply.status, "Request rejected by authentication service");
    Err(GatewayError::Unauthorized(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, ServiceError, ServiceHandler};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn route() -> RouteInfo {
        let mut info = RouteInfo {
            default_auth_service: Some("v1.api.auth".into()),
            ..Default::default()
        };
        info.set_auth_service("authorization", "*", "v1.basic.auth");
        info.set_auth_service("x-app-name", "demo", "v1.demo.auth");
        info.set_auth_service("x-app-name", "*", "v1.app.auth");
        info
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, v.parse().unwrap());
        }
        h
    }

    #[test]
    fn selection_order() {
        let info = route();
        assert_eq!(select_auth_service(&info, &HeaderMap::new()).as_deref(), Some("v1.api.auth"));
        assert_eq!(
            select_auth_service(&info, &headers(&[("authorization", "Bearer x")])).as_deref(),
            Some("v1.basic.auth")
        );
        assert_eq!(
            select_auth_service(&info, &headers(&[("x-app-name", "demo")])).as_deref(),
            Some("v1.demo.auth")
        );
        assert_eq!(
            select_auth_service(&info, &headers(&[("x-app-name", "other")])).as_deref(),
            Some("v1.app.auth")
        );
        assert_eq!(select_auth_service(&RouteInfo::default(), &HeaderMap::new()), None);
    }

    struct Verdict(bool);

    #[async_trait]
    impl ServiceHandler for Verdict {
        async fn handle(&self, _event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
            if self.0 {
                Ok(EventEnvelope::reply(Payload::Bool(true)).with_header("user", "demo"))
            } else {
                Ok(EventEnvelope::reply(Payload::Text("invalid token".into())))
            }
        }
    }

    #[tokio::test]
    async fn truthy_reply_yields_session() {
        let bus = LocalBus::new();
        bus.register("v1.allow", Arc::new(Verdict(true)));
        bus.register("v1.deny", Arc::new(Verdict(false)));
        let req = AsyncHttpRequest::default();

        let session = authenticate(&bus, "v1.allow", &req, Duration::from_secs(1)).await.unwrap();
        assert_eq!(session.get("user").map(String::as_str), Some("demo"));

        let err = authenticate(&bus, "v1.deny", &req, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, GatewayError::Unauthorized("invalid token".into()));
    }
}
