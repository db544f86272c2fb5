//! Route table compilation.
//!
//! # Responsibilities
//! - Decode `rest`, `cors` and `headers` configuration entries one at a time
//! - Validate targets, methods, URLs, auth declarations and references
//! - Produce an immutable [`RouteTable`]
//!
//! # Design Decisions
//! - A bad entry is logged and skipped; it never fails the whole build
//! - `headers` and `cors` load before `rest` so routes can reference them
//! - Every route implicitly accepts OPTIONS; duplicate OPTIONS are ignored

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::routing::matcher::{is_pattern, normalize_url, PatternError, UrlPattern};
use crate::routing::route::{
    CorsInfo, HeaderInfo, RouteInfo, ANY_VALUE, DEFAULT_THRESHOLD, HTTP_RELAY, MAX_THRESHOLD,
    MAX_TIMEOUT_SECS, MIN_THRESHOLD, MIN_TIMEOUT_SECS,
};
use crate::routing::router::{route_key, RouteTable};

pub const VALID_METHODS: [&str; 7] = ["GET", "PUT", "POST", "DELETE", "HEAD", "PATCH", "OPTIONS"];

const HTTP: &str = "http://";
const HTTPS: &str = "https://";
const ACCESS_CONTROL_PREFIX: &str = "Access-Control-";

/// Why a single configuration entry was skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteConfigError {
    #[error("invalid {section} entry: {reason}")]
    Malformed { section: &'static str, reason: String },

    #[error("missing service")]
    MissingService,

    #[error("HTTP relay supports a single URL only")]
    MultipleRelayTargets,

    #[error("cannot mix HTTP and service target")]
    MixedTargets,

    #[error("invalid service name {0}")]
    InvalidServiceName(String),

    #[error("invalid authentication service in {0}")]
    InvalidAuthService(String),

    #[error("missing default authentication service")]
    MissingDefaultAuth,

    #[error("cors ID {0} is not found")]
    UnknownCors(String),

    #[error("headers ID {0} is not found")]
    UnknownHeaders(String),

    #[error("url_rewrite must be a list of 2 prefixes")]
    InvalidUrlRewrite,

    #[error("invalid service URL {url} - {reason}")]
    InvalidRelayUrl { url: String, reason: String },

    #[error("invalid method in {0:?}")]
    InvalidMethod(Vec<String>),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("duplicated method and URL {0}")]
    Duplicate(String),

    #[error("invalid CORS entry {id}: {reason}")]
    InvalidCors { id: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// A configuration value that is read as text whatever its TOML type.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

impl Scalar {
    fn is_true(&self) -> bool {
        self.to_string().eq_ignore_ascii_case("true")
    }
}

#[derive(Debug, Deserialize)]
struct RestEntry {
    url: String,
    service: OneOrMany,
    methods: Vec<String>,
    flow: Option<Scalar>,
    upload: Option<Scalar>,
    authentication: Option<OneOrMany>,
    threshold: Option<Scalar>,
    tracing: Option<Scalar>,
    timeout: Option<Scalar>,
    cors: Option<Scalar>,
    headers: Option<Scalar>,
    url_rewrite: Option<Value>,
    trust_all_cert: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct CorsEntry {
    id: String,
    origin: Option<String>,
    options: Vec<String>,
    headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HeaderEntry {
    id: String,
    request: Option<HeaderGroup>,
    response: Option<HeaderGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeaderGroup {
    add: Vec<String>,
    drop: Vec<String>,
    keep: Vec<String>,
}

/// Parse `N`, `Ns`, `Nm`, `Nh` or `Nd` into seconds, clamped to the timeout range.
pub fn parse_duration(text: &str) -> u64 {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('s') => (&text[..text.len() - 1], 1),
        Some('m') => (&text[..text.len() - 1], 60),
        Some('h') => (&text[..text.len() - 1], 3_600),
        Some('d') => (&text[..text.len() - 1], 86_400),
        _ => (text, 1),
    };
    let n = digits.trim().parse::<i64>().unwrap_or(-1);
    n.saturating_mul(multiplier)
        .clamp(MIN_TIMEOUT_SECS as i64, MAX_TIMEOUT_SECS as i64) as u64
}

/// Clamp a configured streaming threshold.
pub fn clamp_threshold(value: i64) -> usize {
    value.clamp(MIN_THRESHOLD as i64, MAX_THRESHOLD as i64) as usize
}

/// Lower-case letters, digits, `.`, `_` and `-`, not starting or ending with `.`.
pub fn valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

fn is_http_target(s: &str) -> bool {
    s.starts_with(HTTP) || s.starts_with(HTTPS)
}

/// Trim, lower-case and de-duplicate a target list, then validate it.
fn validate_services(raw: Vec<String>) -> Result<Vec<String>, RouteConfigError> {
    let mut result: Vec<String> = Vec::new();
    for item in raw {
        let service = item.trim().to_lowercase();
        if !service.is_empty() && !result.contains(&service) {
            result.push(service);
        }
    }
    let first = result.first().ok_or(RouteConfigError::MissingService)?;
    if is_http_target(first) {
        if result.len() > 1 {
            return Err(RouteConfigError::MultipleRelayTargets);
        }
        return Ok(result);
    }
    for item in &result {
        if is_http_target(item) {
            return Err(RouteConfigError::MixedTargets);
        }
        if !valid_service_name(item) || !item.contains('.') {
            return Err(RouteConfigError::InvalidServiceName(item.clone()));
        }
    }
    Ok(result)
}

fn split_key_value(s: &str) -> Option<(String, String)> {
    let colon = s.find(':')?;
    if colon == 0 {
        return None;
    }
    Some((s[..colon].trim().to_string(), s[colon + 1..].trim().to_string()))
}

fn valid_cors_element(element: &str) -> Result<(), String> {
    if !element.starts_with(ACCESS_CONTROL_PREFIX) {
        return Err(format!("header must start with {}, actual: {}", ACCESS_CONTROL_PREFIX, element));
    }
    let Some(colon) = element.find(':') else {
        return Err(format!("header must contain key-value separated by a colon, actual: {}", element));
    };
    if element[colon + 1..].trim().is_empty() {
        return Err(format!("missing value in {}", element));
    }
    Ok(())
}

/// Incremental builder. Load sections in order, then [`RouteTableBuilder::finish`].
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: HashMap<String, Arc<RouteInfo>>,
    exact: HashSet<String>,
    patterns: BTreeMap<String, UrlPattern>,
    cors: HashMap<String, CorsInfo>,
    request_headers: HashMap<String, HeaderInfo>,
    response_headers: HashMap<String, HeaderInfo>,
    rejected: Vec<RouteConfigError>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all three sections and finish.
    pub fn build(mut self, rest: &[Value], cors: &[Value], headers: &[Value]) -> RouteTable {
        self.load_headers(headers);
        self.load_cors(cors);
        self.load_rest(rest);
        self.finish()
    }

    /// Entries skipped so far.
    pub fn rejected(&self) -> &[RouteConfigError] {
        &self.rejected
    }

    fn reject(&mut self, entry: &Value, error: RouteConfigError) {
        tracing::error!(entry = %entry, error = %error, "Skipping configuration entry");
        self.rejected.push(error);
    }

    pub fn load_headers(&mut self, entries: &[Value]) {
        for entry in entries {
            let parsed: HeaderEntry = match serde_json::from_value(entry.clone()) {
                Ok(e) => e,
                Err(e) => {
                    self.reject(
                        entry,
                        RouteConfigError::Malformed {
                            section: "headers",
                            reason: e.to_string(),
                        },
                    );
                    continue;
                }
            };
            if let Some(group) = parsed.request {
                let info = Self::header_info(&parsed.id, group);
                tracing::info!(id = %parsed.id, direction = "request", "Loaded header transform");
                self.request_headers.insert(parsed.id.clone(), info);
            }
            if let Some(group) = parsed.response {
                let info = Self::header_info(&parsed.id, group);
                tracing::info!(id = %parsed.id, direction = "response", "Loaded header transform");
                self.response_headers.insert(parsed.id.clone(), info);
            }
        }
    }

    fn header_info(id: &str, group: HeaderGroup) -> HeaderInfo {
        let mut info = HeaderInfo::default();
        for item in group.add {
            match split_key_value(&item) {
                Some((k, v)) => {
                    info.add.insert(k.to_lowercase(), v);
                }
                None => tracing::warn!(id = %id, entry = %item, "Skipping invalid header add entry"),
            }
        }
        info.drop.extend(group.drop.iter().map(|s| s.trim().to_lowercase()));
        info.keep.extend(group.keep.iter().map(|s| s.trim().to_lowercase()));
        info
    }

    pub fn load_cors(&mut self, entries: &[Value]) {
        for entry in entries {
            let parsed: CorsEntry = match serde_json::from_value(entry.clone()) {
                Ok(e) => e,
                Err(e) => {
                    self.reject(
                        entry,
                        RouteConfigError::Malformed {
                            section: "cors",
                            reason: e.to_string(),
                        },
                    );
                    continue;
                }
            };
            if let Err(reason) = parsed
                .options
                .iter()
                .chain(parsed.headers.iter())
                .try_for_each(|e| valid_cors_element(e))
            {
                self.reject(entry, RouteConfigError::InvalidCors { id: parsed.id, reason });
                continue;
            }

            let mut info = CorsInfo {
                origin: parsed.origin,
                ..Default::default()
            };
            for (k, v) in parsed.options.iter().filter_map(|s| split_key_value(s)) {
                info.options.insert(k, v);
            }
            for (k, v) in parsed.headers.iter().filter_map(|s| split_key_value(s)) {
                info.headers.insert(k, v);
            }
            tracing::info!(id = %parsed.id, origin = ?info.origin, "Loaded CORS headers");
            self.cors.insert(parsed.id, info);
        }
    }

    pub fn load_rest(&mut self, entries: &[Value]) {
        for entry in entries {
            if let Err(e) = self.load_rest_entry(entry) {
                self.reject(entry, e);
            }
        }
    }

    fn load_rest_entry(&mut self, entry: &Value) -> Result<(), RouteConfigError> {
        let parsed: RestEntry =
            serde_json::from_value(entry.clone()).map_err(|e| RouteConfigError::Malformed {
                section: "rest",
                reason: e.to_string(),
            })?;

        let mut info = RouteInfo {
            flow_id: parsed.flow.as_ref().map(|f| f.to_string()),
            ..Default::default()
        };
        info.services = validate_services(parsed.service.into_vec())?;
        info.primary = info.services[0].clone();

        if let Some(upload) = &parsed.upload {
            let upload = upload.to_string();
            info.upload = upload == "true" || upload == "file";
        }

        if let Some(auth) = parsed.authentication {
            Self::load_auth(&mut info, auth)?;
        }

        if let Some(threshold) = &parsed.threshold {
            let value = threshold.to_string().parse::<i64>().unwrap_or(-1);
            info.threshold = clamp_threshold(value);
            if info.threshold as i64 != value {
                tracing::warn!(url = %parsed.url, configured = value, threshold = info.threshold, "Threshold clamped");
            }
        } else {
            info.threshold = DEFAULT_THRESHOLD;
        }

        info.tracing = parsed.tracing.as_ref().is_some_and(Scalar::is_true);
        if let Some(timeout) = &parsed.timeout {
            info.timeout_secs = parse_duration(&timeout.to_string());
        }

        if let Some(id) = parsed.cors.map(|c| c.to_string()) {
            if !self.cors.contains_key(&id) {
                return Err(RouteConfigError::UnknownCors(id));
            }
            info.cors_id = Some(id);
        }

        if let Some(id) = parsed.headers.map(|h| h.to_string()) {
            let request = self.request_headers.contains_key(&id);
            let response = self.response_headers.contains_key(&id);
            if !request && !response {
                return Err(RouteConfigError::UnknownHeaders(id));
            }
            if request {
                info.request_transform_id = Some(id.clone());
            }
            if response {
                info.response_transform_id = Some(id);
            }
        }

        if is_http_target(&info.primary) {
            if let Some(rewrite) = parsed.url_rewrite {
                match serde_json::from_value::<Vec<String>>(rewrite) {
                    Ok(pair) if pair.len() == 2 => {
                        info.url_rewrite = Some((pair[0].clone(), pair[1].clone()));
                    }
                    _ => return Err(RouteConfigError::InvalidUrlRewrite),
                }
            }
            Self::validate_relay_url(&info.primary)?;
            let trust = parsed.trust_all_cert.as_ref().is_some_and(Scalar::is_true);
            if info.primary.starts_with(HTTPS) {
                if trust {
                    info.trust_all_cert = true;
                    tracing::warn!(target_url = %info.primary, "trust_all_cert=true, certificate checks are disabled");
                }
            } else if parsed.trust_all_cert.is_some() {
                tracing::warn!(target_url = %info.primary, "trust_all_cert is not relevant for http");
            }
            info.host = Some(info.primary.clone());
            info.primary = HTTP_RELAY.to_string();
        } else if parsed.trust_all_cert.is_some() {
            tracing::warn!(service = %info.primary, "trust_all_cert is not relevant for a service target");
        }

        let methods: Vec<String> = parsed.methods.iter().map(|m| m.trim().to_uppercase()).collect();
        if methods.is_empty() || !methods.iter().all(|m| VALID_METHODS.contains(&m.as_str())) {
            return Err(RouteConfigError::InvalidMethod(parsed.methods));
        }
        info.methods = methods.clone();

        let configured = parsed.url.to_lowercase();
        let configured = configured.split('?').next().unwrap_or_default();
        let pattern = if is_pattern(configured) {
            Some(UrlPattern::compile(configured)?)
        } else {
            None
        };
        info.url = match &pattern {
            Some(p) => p.url().to_string(),
            None => normalize_url(configured),
        };

        self.register(info, methods, pattern);
        Ok(())
    }

    fn load_auth(info: &mut RouteInfo, auth: OneOrMany) -> Result<(), RouteConfigError> {
        match auth {
            OneOrMany::One(service) => {
                let service = service.trim().to_lowercase();
                if !valid_service_name(&service) {
                    return Err(RouteConfigError::InvalidAuthService(service));
                }
                info.default_auth_service = Some(service);
            }
            OneOrMany::Many(list) => {
                for item in list {
                    let parts: Vec<&str> = item
                        .split([':', ' '])
                        .filter(|s| !s.is_empty())
                        .collect();
                    match parts.as_slice() {
                        [header, service] if valid_service_name(service) => {
                            if *header == "default" {
                                info.default_auth_service = Some(service.to_string());
                            } else {
                                info.set_auth_service(header, ANY_VALUE, service);
                            }
                        }
                        [header, value, service] if valid_service_name(service) => {
                            info.set_auth_service(header, value, service);
                        }
                        _ => return Err(RouteConfigError::InvalidAuthService(item)),
                    }
                }
                if info.default_auth_service.is_none() {
                    return Err(RouteConfigError::MissingDefaultAuth);
                }
            }
        }
        Ok(())
    }

    fn validate_relay_url(target: &str) -> Result<(), RouteConfigError> {
        let invalid = |reason: &str| RouteConfigError::InvalidRelayUrl {
            url: target.to_string(),
            reason: reason.to_string(),
        };
        let parsed = url::Url::parse(target).map_err(|e| invalid(&e.to_string()))?;
        if parsed.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        let authority_and_rest = target
            .strip_prefix(HTTPS)
            .or_else(|| target.strip_prefix(HTTP))
            .unwrap_or(target);
        if authority_and_rest.contains('/') {
            return Err(invalid("must not contain path"));
        }
        if parsed.query().is_some() || authority_and_rest.contains('?') {
            return Err(invalid("must not contain query"));
        }
        Ok(())
    }

    fn register(&mut self, info: RouteInfo, methods: Vec<String>, pattern: Option<UrlPattern>) {
        let url = info.url.clone();
        match pattern {
            Some(p) => {
                self.patterns.entry(url.clone()).or_insert(p);
            }
            None => {
                self.exact.insert(url.clone());
            }
        }

        let mut all_methods = methods;
        if !all_methods.iter().any(|m| m == "OPTIONS") {
            all_methods.push("OPTIONS".to_string());
        }

        let info = Arc::new(info);
        for method in all_methods {
            let key = route_key(&method, &url);
            if self.routes.contains_key(&key) {
                if method != "OPTIONS" {
                    let error = RouteConfigError::Duplicate(key.clone());
                    tracing::error!(route = %key, "Skipping duplicated method and URL");
                    self.rejected.push(error);
                }
                continue;
            }
            if method == "OPTIONS" {
                tracing::info!(method = %method, url = %url, services = ?info.services, timeout_secs = info.timeout_secs, "Route registered");
            } else {
                tracing::info!(
                    method = %method,
                    url = %url,
                    auth = ?info.default_auth_service,
                    services = ?info.services,
                    timeout_secs = info.timeout_secs,
                    tracing = info.tracing,
                    "Route registered"
                );
            }
            self.routes.insert(key, Arc::clone(&info));
        }
    }

    /// Freeze into an immutable table.
    pub fn finish(self) -> RouteTable {
        let patterns: Vec<UrlPattern> = self.patterns.into_values().collect();
        if !self.exact.is_empty() {
            tracing::info!(count = self.exact.len(), "Number of exact URLs");
        }
        if !patterns.is_empty() {
            tracing::info!(count = patterns.len(), "Number of wildcard URLs");
        }
        RouteTable {
            routes: self.routes,
            exact: self.exact,
            patterns,
            cors: self.cors,
            request_headers: self.request_headers,
            response_headers: self.response_headers,
        }
    }
}
