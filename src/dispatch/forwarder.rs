//! Primary send and secondary fan-out.

use crate::bus::{BusError, EventBus, EventEnvelope, Payload};
use crate::error::GatewayError;
use crate::http::request::AsyncHttpRequest;
use crate::observability::metrics;
use crate::routing::RouteInfo;

/// Sender name stamped on traced events.
pub const HTTP_REQUEST: &str = "http.request";

/// Trace id and trace path for a traced route.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    pub id: String,
    pub path: String,
}

fn outbound(to: &str, request: &AsyncHttpRequest, trace: Option<&TraceContext>) -> EventEnvelope {
    let event = EventEnvelope::new(to).with_body(Payload::HttpRequest(Box::new(request.clone())));
    match trace {
        Some(t) => event.with_from(HTTP_REQUEST).with_trace(t.id.clone(), t.path.clone()),
        None => event,
    }
}

/// Send to the primary service, then best-effort copies to the secondaries.
///
/// Only the primary send can fail the request. Secondary failures are logged
/// and counted.
pub async fn forward(
    bus: &dyn EventBus,
    info: &RouteInfo,
    request: &AsyncHttpRequest,
    correlation_id: &str,
    reply_to: &str,
    trace: Option<&TraceContext>,
) -> Result<(), GatewayError> {
    let primary = outbound(&info.primary, request, trace)
        .with_correlation_id(correlation_id)
        .with_reply_to(reply_to);

    bus.send(primary).await.map_err(|e| match e {
        BusError::NotReachable(service) => GatewayError::ServiceUnavailable(service),
        other => GatewayError::BadRequest(other.to_string()),
    })?;

    for secondary in info.secondary_services() {
        if let Err(e) = bus.send(outbound(secondary, request, trace)).await {
            metrics::record_fanout_failure(secondary);
            tracing::warn!(service = %secondary, error = %e, "Unable to copy event to secondary service");
        }
    }
    Ok(())
}
