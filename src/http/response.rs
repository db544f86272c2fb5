//! Reply envelope to HTTP response.
//!
//! # Responsibilities
//! - Map error replies to the JSON error payload
//! - Render the reply body with a content type inferred from its shape
//! - Pipe reply streams (`stream` header) to the client without buffering
//! - Apply the route's response header transform
//!
//! # Design Decisions
//! - A content type set by the service always wins over the inferred one
//! - Bus bookkeeping headers (`stream`, `timeout`) never reach the client
//! - An unknown stream id yields an empty body, not an error

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};

use crate::bus::{EventEnvelope, Payload, StreamRegistry};
use crate::error::GatewayError;
use crate::http::headers::{insert_all, transform_response};
use crate::routing::HeaderInfo;

pub const STREAM_HEADER: &str = "stream";
const TIMEOUT_HEADER: &str = "timeout";

const APPLICATION_JSON: &str = "application/json";
const TEXT_PLAIN: &str = "text/plain";
const OCTET_STREAM: &str = "application/octet-stream";

/// Build the HTTP response for a reply.
pub async fn render(
    reply: EventEnvelope,
    transform: Option<&HeaderInfo>,
    streams: &StreamRegistry,
) -> Result<Response, GatewayError> {
    if reply.is_error() {
        return Err(GatewayError::Remote {
            status: reply.status,
            message: reply.body.as_message(),
        });
    }

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    let mut headers = HeaderMap::new();
    let mut stream_id = None;
    let forwarded: Vec<(&String, &String)> = reply
        .headers
        .iter()
        .filter(|(k, v)| {
            let key = k.to_lowercase();
            if key == STREAM_HEADER {
                stream_id = Some(v.to_string());
                false
            } else {
                key != TIMEOUT_HEADER
            }
        })
        .collect();
    insert_all(&mut headers, forwarded);

    let body = match stream_id.and_then(|id| streams.take(&id).map(|s| (id, s))) {
        Some((id, stream)) => {
            let byte_stream = stream
                .into_byte_stream()
                .await
                .map_err(|e| GatewayError::Internal(format!("Unable to open stream {} - {}", id, e)))?;
            set_default_type(&mut headers, OCTET_STREAM);
            Body::from_stream(byte_stream)
        }
        None => payload_body(reply.body, &mut headers)?,
    };

    if let Some(transform) = transform {
        transform_response(&mut headers, transform);
    }

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn set_default_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

fn payload_body(payload: Payload, headers: &mut HeaderMap) -> Result<Body, GatewayError> {
    let body = match payload {
        Payload::Empty => Body::empty(),
        Payload::Text(text) => {
            set_default_type(headers, TEXT_PLAIN);
            Body::from(text)
        }
        Payload::Binary(bytes) => {
            set_default_type(headers, OCTET_STREAM);
            Body::from(bytes)
        }
        other => {
            set_default_type(headers, APPLICATION_JSON);
            let json = serde_json::to_vec(&other)
                .map_err(|e| GatewayError::Internal(format!("Unable to serialize reply - {}", e)))?;
            Body::from(json)
        }
    };
    Ok(body)
}
