//! Request body strategies.
//!
//! # Responsibilities
//! - Pick how to consume a request body from method, content type and size
//! - Buffer and decode JSON, XML, form and text bodies
//! - Spool multipart uploads and large binary bodies into object streams
//!
//! # Data Flow
//! ```text
//! POST/PUT/PATCH body
//!     → select() by Content-Type / Content-Length / route threshold
//!     → buffered: to_bytes → decode → RequestBody
//!     → streamed: body chunks → bounded channel → writer task → StreamWriter
//!                 → stream id + size stamped on the descriptor
//! ```
//!
//! # Design Decisions
//! - Dispatch waits until the whole body is consumed, buffered or streamed
//! - A failed or aborted upload never leaves a registered stream behind
//! - XML that does not parse degrades to text instead of failing the request

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, HeaderMap, Method, Request};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::bus::StreamRegistry;
use crate::error::GatewayError;
use crate::http::request::{AsyncHttpRequest, RequestBody};

const MULTIPART_FORM_DATA: &str = "multipart/form-data";
const APPLICATION_JSON: &str = "application/json";
const APPLICATION_XML: &str = "application/xml";
const APPLICATION_FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const TEXT_HTML: &str = "text/html";
const TEXT_PLAIN: &str = "text/plain";

/// Chunks in flight between the HTTP body and the stream writer.
const SPOOL_CHANNEL_DEPTH: usize = 16;

/// How a request body is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStrategy {
    Multipart,
    Json,
    Xml,
    Form,
    Text,
    Binary,
    Streamed,
}

impl fmt::Display for BodyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BodyStrategy::Multipart => "multipart",
            BodyStrategy::Json => "json",
            BodyStrategy::Xml => "xml",
            BodyStrategy::Form => "form",
            BodyStrategy::Text => "text",
            BodyStrategy::Binary => "binary",
            BodyStrategy::Streamed => "streamed",
        };
        f.write_str(name)
    }
}

/// Choose a strategy. `None` means the body is ignored.
pub fn select(method: &Method, headers: &HeaderMap, threshold: usize) -> Option<BodyStrategy> {
    if *method != Method::POST && *method != Method::PUT && *method != Method::PATCH {
        return None;
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("?")
        .to_lowercase();

    let strategy = if content_type.starts_with(MULTIPART_FORM_DATA) && *method == Method::POST {
        BodyStrategy::Multipart
    } else if content_type.starts_with(APPLICATION_JSON) {
        BodyStrategy::Json
    } else if content_type.starts_with(APPLICATION_XML) {
        BodyStrategy::Xml
    } else if content_type.starts_with(APPLICATION_FORM_URLENCODED) {
        BodyStrategy::Form
    } else if content_type.starts_with(TEXT_HTML) || content_type.starts_with(TEXT_PLAIN) {
        BodyStrategy::Text
    } else {
        let length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if length > 0 && length <= threshold as u64 {
            BodyStrategy::Binary
        } else {
            BodyStrategy::Streamed
        }
    };
    Some(strategy)
}

/// Limits and sinks used while consuming a body.
#[derive(Clone)]
pub struct BodyContext {
    pub streams: Arc<StreamRegistry>,
    pub max_buffered: usize,
}

/// Consume the request body with `strategy`, filling in the descriptor.
///
/// Multipart parsing honours the request's `DefaultBodyLimit`; the gateway
/// router disables it so uploads are bounded only by the stream store.
/// On error, any stream already spooled for this request is discarded.
pub async fn materialize(
    strategy: BodyStrategy,
    request: Request<Body>,
    req: &mut AsyncHttpRequest,
    ctx: &BodyContext,
) -> Result<(), GatewayError> {
    let result = consume(strategy, request, req, ctx).await;
    if result.is_err() {
        if let Some(id) = req.stream.take() {
            tracing::debug!(stream = %id, "Discarding stream of failed upload");
            ctx.streams.discard(&id);
        }
        req.filename = None;
        req.size = None;
    }
    result
}

async fn consume(
    strategy: BodyStrategy,
    request: Request<Body>,
    req: &mut AsyncHttpRequest,
    ctx: &BodyContext,
) -> Result<(), GatewayError> {
    match strategy {
        BodyStrategy::Multipart => receive_multipart(request, req, ctx).await,
        BodyStrategy::Streamed => {
            let (stream, size) = spool(request.into_body().into_data_stream(), &ctx.streams).await?;
            req.stream = stream;
            req.size = Some(size);
            Ok(())
        }
        BodyStrategy::Binary => {
            let bytes = buffer(request.into_body(), ctx.max_buffered).await?;
            req.size = Some(bytes.len() as u64);
            req.body = RequestBody::Binary(bytes);
            Ok(())
        }
        BodyStrategy::Json => {
            let text = buffer_text(request.into_body(), ctx.max_buffered).await?;
            req.body = decode_json(text.trim())?;
            Ok(())
        }
        BodyStrategy::Xml => {
            let text = buffer_text(request.into_body(), ctx.max_buffered).await?;
            let text = text.trim();
            req.body = if text.is_empty() {
                RequestBody::Json(Value::Object(Map::new()))
            } else {
                match xml_to_json(text) {
                    Ok(v) => RequestBody::Json(v),
                    Err(e) => {
                        tracing::debug!(error = %e, "XML body kept as text");
                        RequestBody::Text(text.to_string())
                    }
                }
            };
            Ok(())
        }
        BodyStrategy::Form => {
            let text = buffer_text(request.into_body(), ctx.max_buffered).await?;
            for (k, v) in url::form_urlencoded::parse(text.as_bytes()) {
                req.add_query_parameter(&k, v);
            }
            Ok(())
        }
        BodyStrategy::Text => {
            req.body = RequestBody::Text(buffer_text(request.into_body(), ctx.max_buffered).await?);
            Ok(())
        }
    }
}

async fn buffer(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Unable to read request body - {}", e)))
}

async fn buffer_text(body: Body, limit: usize) -> Result<String, GatewayError> {
    let bytes = buffer(body, limit).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Empty is an empty object; object and array shapes are parsed; anything else stays text.
pub fn decode_json(text: &str) -> Result<RequestBody, GatewayError> {
    if text.is_empty() {
        return Ok(RequestBody::Json(Value::Object(Map::new())));
    }
    let shaped = (text.starts_with('{') && text.ends_with('}'))
        || (text.starts_with('[') && text.ends_with(']'));
    if !shaped {
        return Ok(RequestBody::Text(text.to_string()));
    }
    serde_json::from_str(text)
        .map(RequestBody::Json)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid JSON - {}", e)))
}

/// Write a chunk stream into a new object stream.
///
/// A writer task drains a bounded channel so a slow disk applies backpressure
/// to the client. Returns the stream id (absent for an empty body) and size.
async fn spool<S, E>(chunks: S, streams: &Arc<StreamRegistry>) -> Result<(Option<String>, u64), GatewayError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut writer = streams
        .create()
        .map_err(|e| GatewayError::Internal(format!("Unable to create stream - {}", e)))?;
    let (tx, mut rx) = mpsc::channel::<Bytes>(SPOOL_CHANNEL_DEPTH);

    let sink = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            writer.write(&chunk).await?;
        }
        let size = writer.written();
        writer.close().await.map(|id| (id, size))
    });

    let mut chunks = std::pin::pin!(chunks);
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                sink.abort();
                return Err(GatewayError::BadRequest(format!("Unable to read request body - {}", e)));
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if tx.send(chunk).await.is_err() {
            // writer failed; its error is reported below
            break;
        }
    }
    drop(tx);

    match sink.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(GatewayError::Internal(format!("Unable to write stream - {}", e))),
        Err(e) => Err(GatewayError::Internal(format!("Stream writer failed - {}", e))),
    }
}

async fn receive_multipart(
    request: Request<Body>,
    req: &mut AsyncHttpRequest,
    ctx: &BodyContext,
) -> Result<(), GatewayError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| GatewayError::BadRequest(e.body_text()))?;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        let Some(mut field) = field else { break };

        match field.file_name().map(str::to_string) {
            Some(filename) if req.stream.is_none() && req.filename.is_none() => {
                let (stream, size) = spool(field, &ctx.streams).await?;
                req.filename = Some(filename);
                req.stream = stream;
                req.size = Some(size);
            }
            Some(filename) => {
                tracing::warn!(filename = %filename, "Ignoring additional file in multipart upload");
                while field
                    .chunk()
                    .await
                    .map_err(|e| GatewayError::BadRequest(e.body_text()))?
                    .is_some()
                {}
            }
            None => {
                let name = field.name().unwrap_or_default().to_string();
                let value = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::BadRequest(e.body_text()))?;
                if !name.is_empty() {
                    req.add_query_parameter(&name, value);
                }
            }
        }
    }
    Ok(())
}

/// Convert an XML document into a JSON map.
///
/// The root element name is dropped. Attributes and child elements become
/// keys, repeated children become arrays, and text next to children is kept
/// under `value`.
pub fn xml_to_json(text: &str) -> Result<Value, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(String, Map<String, Value>, String)> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push((name, attributes(&e)?, String::new()));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = attributes(&e)?;
                let value = if attrs.is_empty() {
                    Value::String(String::new())
                } else {
                    Value::Object(attrs)
                };
                attach(&mut stack, &mut root, name, value)?;
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                let (name, mut map, text) = stack.pop().ok_or("unexpected end tag")?;
                let value = if map.is_empty() {
                    Value::String(text)
                } else {
                    if !text.is_empty() {
                        map.insert("value".to_string(), Value::String(text));
                    }
                    Value::Object(map)
                };
                attach(&mut stack, &mut root, name, value)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unclosed element".to_string());
    }
    match root {
        Some((_, Value::Object(map))) => Ok(Value::Object(map)),
        Some((name, value)) => {
            let mut map = Map::new();
            map.insert(name, value);
            Ok(Value::Object(map))
        }
        None => Err("missing root element".to_string()),
    }
}

fn attributes(e: &quick_xml::events::BytesStart<'_>) -> Result<Map<String, Value>, String> {
    let mut map = Map::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        map.insert(key, Value::String(value.into_owned()));
    }
    Ok(map)
}

fn attach(
    stack: &mut [(String, Map<String, Value>, String)],
    root: &mut Option<(String, Value)>,
    name: String,
    value: Value,
) -> Result<(), String> {
    let Some(parent) = stack.last_mut() else {
        if root.is_some() {
            return Err("multiple root elements".to_string());
        }
        *root = Some((name, value));
        return Ok(());
    };
    let map = &mut parent.1;
    match map.remove(&name) {
        None => {
            map.insert(name, value);
        }
        Some(Value::Array(mut items)) => {
            items.push(value);
            map.insert(name, Value::Array(items));
        }
        Some(existing) => {
            map.insert(name, Value::Array(vec![existing, value]));
        }
    }
    Ok(())
}
