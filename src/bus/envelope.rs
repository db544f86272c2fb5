//! Message envelope carried on the event bus.

use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;

use crate::http::request::AsyncHttpRequest;

/// Body of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    #[default]
    Empty,
    Bool(bool),
    Json(serde_json::Value),
    Text(String),
    Binary(Bytes),
    HttpRequest(Box<AsyncHttpRequest>),
}

impl Payload {
    /// A positive verdict from an authentication service.
    pub fn is_truthy(&self) -> bool {
        match self {
            Payload::Bool(b) => *b,
            Payload::Json(serde_json::Value::Bool(b)) => *b,
            Payload::Text(t) => t.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Render the payload as a human readable message (used for error bodies).
    pub fn as_message(&self) -> String {
        match self {
            Payload::Empty => String::new(),
            Payload::Bool(b) => b.to_string(),
            Payload::Text(t) => t.clone(),
            Payload::Json(serde_json::Value::String(s)) => s.clone(),
            Payload::Json(serde_json::Value::Object(map)) => match map.get("message") {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => serde_json::Value::Object(map.clone()).to_string(),
            },
            Payload::Json(v) => v.to_string(),
            Payload::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Payload::HttpRequest(_) => "http request".to_string(),
        }
    }
}

/// A routed message with optional correlation and tracing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub id: String,
    pub to: Option<String>,
    pub from: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Payload,
    pub status: u16,
    pub trace_id: Option<String>,
    pub trace_path: Option<String>,
}

impl Default for EventEnvelope {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            to: None,
            from: None,
            reply_to: None,
            correlation_id: None,
            headers: HashMap::new(),
            body: Payload::Empty,
            status: 200,
            trace_id: None,
            trace_path: None,
        }
    }
}

impl EventEnvelope {
    /// Create an envelope addressed to `to`.
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            ..Default::default()
        }
    }

    /// A reply envelope without a destination.
    pub fn reply(body: Payload) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// An error reply with the given status.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Payload::Text(message.into()),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Payload) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, trace_path: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.trace_path = Some(trace_path.into());
        self
    }

    /// Status codes of 400 and above denote an error reply.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_payloads() {
        assert!(Payload::Bool(true).is_truthy());
        assert!(Payload::Text("TRUE".into()).is_truthy());
        assert!(Payload::Json(serde_json::json!(true)).is_truthy());
        assert!(!Payload::Bool(false).is_truthy());
        assert!(!Payload::Empty.is_truthy());
        assert!(!Payload::Json(serde_json::json!({"ok": true})).is_truthy());
    }

    #[test]
    fn error_message_prefers_message_field() {
        let p = Payload::Json(serde_json::json!({"message": "denied", "code": 7}));
        assert_eq!(p.as_message(), "denied");
        assert_eq!(Payload::Text("nope".into()).as_message(), "nope");
    }

    #[test]
    fn error_envelope_status() {
        let e = EventEnvelope::error(503, "down");
        assert!(e.is_error());
        assert_eq!(e.body, Payload::Text("down".into()));
        assert!(!EventEnvelope::reply(Payload::Empty).is_error());
    }
}
