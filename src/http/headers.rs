//! CORS and header-transform application on responses.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::routing::HeaderInfo;

/// Capitalize every `-` separated token: `access-control-allow-origin`
/// becomes `Access-Control-Allow-Origin`.
pub fn header_case(header: &str) -> Option<String> {
    let parts: Vec<String> = header
        .split('-')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("-"))
    }
}

/// Canonical-case header list, ready to merge into a response.
pub fn canonical_headers(source: &BTreeMap<String, String>) -> Vec<(String, String)> {
    source
        .iter()
        .filter_map(|(k, v)| header_case(k).map(|k| (k, v.clone())))
        .collect()
}

/// Insert headers, skipping any name or value that is not valid HTTP.
pub fn insert_all<'a, I>(target: &mut HeaderMap, headers: I)
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    for (k, v) in headers {
        match (HeaderName::try_from(k.as_str()), HeaderValue::try_from(v.as_str())) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => tracing::warn!(header = %k, "Skipping invalid header"),
        }
    }
}

/// Apply a response-direction transform to outgoing headers.
pub fn transform_response(headers: &mut HeaderMap, transform: &HeaderInfo) {
    let mut current: BTreeMap<String, String> = BTreeMap::new();
    for name in headers.keys() {
        if let Some(v) = headers.get(name).and_then(|v| v.to_str().ok()) {
            current.insert(name.as_str().to_string(), v.to_string());
        }
    }
    let updated = transform.apply(current);
    let removed: Vec<HeaderName> = headers
        .keys()
        .filter(|k| !updated.contains_key(k.as_str()))
        .cloned()
        .collect();
    for name in removed {
        headers.remove(name);
    }
    insert_all(headers, updated.iter());
}
