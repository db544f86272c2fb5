//! Request descriptor assembly.
//!
//! # Responsibilities
//! - Sanitize the raw request path before matching
//! - Build the [`AsyncHttpRequest`] descriptor sent to services
//! - Collect headers, cookies, query and path parameters, remote address
//! - Apply request header transforms, flow id and URL rewrite
//! - Resolve the trace id for traced routes
//!
//! # Design Decisions
//! - Header keys are lower-cased; only the first value of a repeated header is kept
//! - The cookie header is never forwarded as a header, only as parsed cookies
//! - A repeated query key becomes a list, a single one stays a string

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::http::{header, request::Parts, HeaderMap};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::routing::{AssignedRoute, RouteTable};

pub const FLOW_ID_HEADER: &str = "x-flow-id";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const PATH_STOP_CHARS: [char; 6] = [':', '<', '>', '&', '"', '\''];

/// A query parameter that appeared once or several times.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            QueryValue::One(s) => Some(s),
            QueryValue::Many(v) => v.first().map(String::as_str),
        }
    }

    fn push(self, value: String) -> Self {
        match self {
            QueryValue::One(first) => QueryValue::Many(vec![first, value]),
            QueryValue::Many(mut all) => {
                all.push(value);
                QueryValue::Many(all)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Parameters {
    pub path: BTreeMap<String, String>,
    pub query: BTreeMap<String, QueryValue>,
}

/// Materialized request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
    Binary(Bytes),
}

/// The canonical request descriptor delivered to services.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AsyncHttpRequest {
    pub method: String,
    pub url: String,
    pub ip: String,
    pub https: bool,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// Headers returned by the authentication service.
    pub session: BTreeMap<String, String>,
    pub parameters: Parameters,
    /// Raw query string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub timeout: u64,
    pub body: RequestBody,
    /// Stream id when the body was spooled instead of buffered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Relay target base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub trust_all_cert: bool,
}

impl AsyncHttpRequest {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn path_parameter(&self, key: &str) -> Option<&str> {
        self.parameters.path.get(key).map(String::as_str)
    }

    pub fn query_parameter(&self, key: &str) -> Option<&str> {
        self.parameters.query.get(key).and_then(QueryValue::first)
    }

    /// Add a query value. A repeated key becomes a list.
    pub fn add_query_parameter(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let next = match self.parameters.query.remove(key) {
            Some(existing) => existing.push(value),
            None => QueryValue::One(value),
        };
        self.parameters.query.insert(key.to_string(), next);
    }
}

/// Percent-decode a path and cut it at the first character that has no
/// business in a URL path.
pub fn sanitize_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    match decoded.find(PATH_STOP_CHARS) {
        Some(idx) => decoded[..idx].to_string(),
        None => decoded.into_owned(),
    }
}

/// Replace a leading `from` prefix with `to`.
pub fn rewrite_url(url: &str, rewrite: Option<&(String, String)>) -> String {
    match rewrite {
        Some((from, to)) => match url.strip_prefix(from.as_str()) {
            Some(rest) => format!("{}{}", to, rest),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}

/// Parse every `Cookie` header into name -> value.
pub fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Lower-case keyed single-value headers, cookie excluded.
pub fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        if *name == header::COOKIE {
            continue;
        }
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            out.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    out
}

/// First configured trace header present on the request, or the default
/// label with a fresh id.
pub fn resolve_trace_id(headers: &HeaderMap, labels: &[String]) -> (String, String) {
    for label in labels {
        if let Some(id) = headers.get(label.as_str()).and_then(|v| v.to_str().ok()) {
            return (label.clone(), id.to_string());
        }
    }
    let default = labels
        .first()
        .cloned()
        .unwrap_or_else(|| "X-Trace-Id".to_string());
    (default, uuid::Uuid::new_v4().simple().to_string())
}

/// `METHOD path[?query]`
pub fn trace_path(method: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{} {}?{}", method, path, q),
        None => format!("{} {}", method, path),
    }
}

/// Build the descriptor for a matched route. The body is attached later.
pub fn assemble(
    parts: &Parts,
    path: &str,
    route: &AssignedRoute,
    table: &RouteTable,
    remote: Option<SocketAddr>,
) -> AsyncHttpRequest {
    let info = &route.info;
    let query = parts.uri.query().map(str::to_string);

    let mut req = AsyncHttpRequest {
        method: parts.method.as_str().to_string(),
        url: rewrite_url(path, info.url_rewrite.as_ref()),
        ip: remote.map(|a| a.ip().to_string()).unwrap_or_default(),
        https: parts
            .headers
            .get(FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "https"),
        timeout: info.timeout_secs,
        query: query.clone(),
        ..Default::default()
    };

    if let Some(host) = &info.host {
        req.host = Some(host.clone());
        req.trust_all_cert = info.trust_all_cert;
    }

    req.parameters.path = route.arguments.clone();
    if let Some(q) = &query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            req.add_query_parameter(&k, v);
        }
    }

    req.cookies = parse_cookies(&parts.headers);
    let mut headers = collect_headers(&parts.headers);
    if let Some(transform) = info
        .request_transform_id
        .as_deref()
        .and_then(|id| table.request_transform(id))
    {
        headers = transform.apply(headers);
    }
    req.headers = headers;

    if let Some(flow) = &info.flow_id {
        req.headers.insert(FLOW_ID_HEADER.to_string(), flow.clone());
    }
    req
}
