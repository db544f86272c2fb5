//! Built-in HTTP relay service.
//!
//! # Responsibilities
//! - Serve relay routes (routes whose target is an external URL)
//! - Rebuild the outbound request from the request descriptor
//! - Send spooled request bodies without buffering them
//! - Reply with the upstream status, headers and body
//!
//! # Design Decisions
//! - Registered on the bus under `async.http.request` like any other service
//! - Upstream bodies above the buffer limit (or of unknown size) are spooled
//!   into a stream and returned through the `stream` reply header
//! - Hop-by-hop headers are never copied in either direction

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::bus::{EventEnvelope, Payload, ServiceError, ServiceHandler, StreamRegistry};
use crate::http::request::{AsyncHttpRequest, QueryValue, RequestBody};
use crate::http::response::STREAM_HEADER;
use crate::routing::route::MAX_THRESHOLD;

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const OCTET_STREAM: &str = "application/octet-stream";

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}

/// Outbound HTTP client for relay routes.
pub struct HttpRelay {
    client: reqwest::Client,
    insecure: reqwest::Client,
    streams: Arc<StreamRegistry>,
}

impl HttpRelay {
    pub fn new(streams: Arc<StreamRegistry>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            insecure: reqwest::Client::builder().danger_accept_invalid_certs(true).build()?,
            streams,
        })
    }

    fn target_url(req: &AsyncHttpRequest) -> Result<String, ServiceError> {
        let host = req
            .host
            .as_deref()
            .ok_or_else(|| ServiceError::new(400, "Missing target host"))?;
        let mut target = format!("{}{}", host.trim_end_matches('/'), req.url);
        if let Some(query) = req.query.as_deref().filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }
        Ok(target)
    }

    async fn request_body(&self, req: &AsyncHttpRequest) -> Result<Option<(reqwest::Body, Option<&'static str>)>, ServiceError> {
        if let Some(id) = &req.stream {
            let stream = self
                .streams
                .take(id)
                .ok_or_else(|| ServiceError::new(400, format!("Stream {} not found", id)))?;
            let chunks = stream
                .into_byte_stream()
                .await
                .map_err(|e| ServiceError::new(500, format!("Unable to open stream {} - {}", id, e)))?;
            let content_type = req.filename.as_ref().map(|_| OCTET_STREAM);
            return Ok(Some((reqwest::Body::wrap_stream(chunks), content_type)));
        }

        let body = match &req.body {
            RequestBody::Json(v) => {
                let json = serde_json::to_vec(v).map_err(|e| ServiceError::new(400, e.to_string()))?;
                Some((reqwest::Body::from(json), None))
            }
            RequestBody::Text(t) => Some((reqwest::Body::from(t.clone()), None)),
            RequestBody::Binary(b) => Some((reqwest::Body::from(b.clone()), None)),
            RequestBody::Empty => {
                let is_form = req
                    .header(CONTENT_TYPE.as_str())
                    .is_some_and(|ct| ct.to_lowercase().starts_with(FORM_URLENCODED));
                if is_form {
                    let mut form = url::form_urlencoded::Serializer::new(String::new());
                    for (k, v) in &req.parameters.query {
                        match v {
                            QueryValue::One(s) => {
                                form.append_pair(k, s);
                            }
                            QueryValue::Many(all) => {
                                for s in all {
                                    form.append_pair(k, s);
                                }
                            }
                        }
                    }
                    Some((reqwest::Body::from(form.finish()), None))
                } else {
                    None
                }
            }
        };
        Ok(body)
    }

    async fn relay(&self, req: &AsyncHttpRequest) -> Result<EventEnvelope, ServiceError> {
        let target = Self::target_url(req)?;
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|e| ServiceError::new(405, e.to_string()))?;
        let client = if req.trust_all_cert { &self.insecure } else { &self.client };

        let mut builder = client.request(method, &target);
        if req.timeout > 0 {
            builder = builder.timeout(Duration::from_secs(req.timeout));
        }

        let body = self.request_body(req).await?;
        let replaced_type = body.as_ref().and_then(|(_, ct)| *ct);
        for (k, v) in &req.headers {
            if is_hop_by_hop(k) || (replaced_type.is_some() && k == CONTENT_TYPE.as_str()) {
                continue;
            }
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(ct) = replaced_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        if !req.cookies.is_empty() {
            let cookie = req
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        if let Some((body, _)) = body {
            builder = builder.body(body);
        }

        tracing::debug!(target_url = %target, method = %req.method, "Relaying request");
        let response = builder.send().await.map_err(|e| upstream_error(&target, e))?;
        self.reply_from(&target, response).await
    }

    async fn reply_from(&self, target: &str, response: reqwest::Response) -> Result<EventEnvelope, ServiceError> {
        let status = response.status().as_u16();
        let mut reply = EventEnvelope::default().with_status(status);
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let Ok(v) = value.to_str() {
                reply.headers.insert(name.as_str().to_string(), v.to_string());
            }
        }
        let content_type = reply.headers.get(CONTENT_TYPE.as_str()).cloned().unwrap_or_default();

        let small = response
            .content_length()
            .is_some_and(|len| len <= MAX_THRESHOLD as u64);
        if small {
            let bytes = response.bytes().await.map_err(|e| upstream_error(target, e))?;
            reply.body = payload_for(&content_type, bytes);
            return Ok(reply);
        }

        let mut writer = self
            .streams
            .create()
            .map_err(|e| ServiceError::new(500, format!("Unable to create stream - {}", e)))?;
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| upstream_error(target, e))?;
            writer
                .write(&chunk)
                .await
                .map_err(|e| ServiceError::new(500, format!("Unable to write stream - {}", e)))?;
        }
        let id = writer
            .close()
            .await
            .map_err(|e| ServiceError::new(500, format!("Unable to close stream - {}", e)))?;
        if let Some(id) = id {
            reply.headers.insert(STREAM_HEADER.to_string(), id);
        }
        Ok(reply)
    }
}

fn upstream_error(target: &str, e: reqwest::Error) -> ServiceError {
    tracing::warn!(target_url = %target, error = %e, "Relay request failed");
    if e.is_timeout() {
        ServiceError::new(408, format!("Timeout calling {}", target))
    } else if e.is_connect() {
        ServiceError::new(503, format!("Unable to connect to {}", target))
    } else {
        ServiceError::new(400, e.to_string())
    }
}

fn payload_for(content_type: &str, bytes: Bytes) -> Payload {
    if bytes.is_empty() {
        return Payload::Empty;
    }
    let ct = content_type.to_lowercase();
    if ct.starts_with("application/json") {
        if let Ok(v) = serde_json::from_slice(&bytes) {
            return Payload::Json(v);
        }
    }
    if ct.starts_with("text/") || ct.contains("json") || ct.contains("xml") {
        return Payload::Text(String::from_utf8_lossy(&bytes).into_owned());
    }
    Payload::Binary(bytes)
}

#[async_trait]
impl ServiceHandler for HttpRelay {
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        match event.body {
            Payload::HttpRequest(req) => self.relay(&req).await,
            _ => Err(ServiceError::new(400, "Invalid request - expected an HTTP request")),
        }
    }
}
