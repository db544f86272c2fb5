//! Compiled route, CORS and header-transform definitions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

/// Sentinel primary service for routes whose target is an external URL.
pub const HTTP_RELAY: &str = "async.http.request";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_THRESHOLD: usize = 50_000;
pub const MIN_THRESHOLD: usize = 5_000;
pub const MAX_THRESHOLD: usize = 500_000;

/// Wildcard value in the auth override table.
pub const ANY_VALUE: &str = "*";

/// One compiled endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteInfo {
    /// Normalized configured URL.
    pub url: String,
    /// Service receiving the response-bound request.
    pub primary: String,
    /// Every declared target in order. The first entry is the configured primary.
    pub services: Vec<String>,
    pub methods: Vec<String>,
    pub timeout_secs: u64,
    pub threshold: usize,
    pub tracing: bool,
    pub upload: bool,
    pub trust_all_cert: bool,
    pub cors_id: Option<String>,
    pub request_transform_id: Option<String>,
    pub response_transform_id: Option<String>,
    pub default_auth_service: Option<String>,
    /// Header names with auth overrides, in declaration order.
    pub auth_headers: Vec<String>,
    /// (header, value or `*`) -> auth service.
    #[serde(skip)]
    pub auth_services: HashMap<(String, String), String>,
    pub url_rewrite: Option<(String, String)>,
    /// Target base URL of a relay route.
    pub host: Option<String>,
    pub flow_id: Option<String>,
}

impl Default for RouteInfo {
    fn default() -> Self {
        Self {
            url: "/".to_string(),
            primary: String::new(),
            services: Vec::new(),
            methods: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            threshold: DEFAULT_THRESHOLD,
            tracing: false,
            upload: false,
            trust_all_cert: false,
            cors_id: None,
            request_transform_id: None,
            response_transform_id: None,
            default_auth_service: None,
            auth_headers: Vec::new(),
            auth_services: HashMap::new(),
            url_rewrite: None,
            host: None,
            flow_id: None,
        }
    }
}

impl RouteInfo {
    /// Best-effort fan-out targets.
    pub fn secondary_services(&self) -> impl Iterator<Item = &str> {
        let relay = self.host.is_some();
        self.services
            .iter()
            .skip(1)
            .filter(move |_| !relay)
            .map(String::as_str)
    }

    /// Register an auth override. `value` of `*` matches any header value.
    pub fn set_auth_service(&mut self, header: &str, value: &str, service: &str) {
        let header = header.trim().to_lowercase();
        if !self.auth_headers.contains(&header) {
            self.auth_headers.push(header.clone());
        }
        self.auth_services
            .insert((header, value.trim().to_string()), service.to_string());
    }

    /// Override for an exact (header, value) pair.
    pub fn scoped_auth_service(&self, header: &str, value: &str) -> Option<&str> {
        self.auth_services
            .get(&(header.to_string(), value.to_string()))
            .map(String::as_str)
    }

    /// Override for a header regardless of its value.
    pub fn any_value_auth_service(&self, header: &str) -> Option<&str> {
        self.scoped_auth_service(header, ANY_VALUE)
    }
}

/// Result of a successful match.
#[derive(Debug, Clone)]
pub struct AssignedRoute {
    pub info: Arc<RouteInfo>,
    /// Path parameter name -> value.
    pub arguments: BTreeMap<String, String>,
}

impl AssignedRoute {
    pub fn new(info: Arc<RouteInfo>) -> Self {
        Self {
            info,
            arguments: BTreeMap::new(),
        }
    }
}

/// Named CORS policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorsInfo {
    pub origin: Option<String>,
    /// Headers for preflight (OPTIONS) responses.
    pub options: BTreeMap<String, String>,
    /// Headers for actual responses.
    pub headers: BTreeMap<String, String>,
}

/// Add/drop/keep rules for one direction of header traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderInfo {
    pub add: BTreeMap<String, String>,
    pub drop: BTreeSet<String>,
    pub keep: BTreeSet<String>,
}

impl HeaderInfo {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.drop.is_empty() && self.keep.is_empty()
    }

    /// Apply the rules to a lower-case keyed header map.
    pub fn apply(&self, headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut result: BTreeMap<String, String> = if self.keep.is_empty() {
            headers
        } else {
            headers
                .into_iter()
                .filter(|(k, _)| self.keep.contains(&k.to_lowercase()))
                .collect()
        };
        if !self.drop.is_empty() {
            result.retain(|k, _| !self.drop.contains(&k.to_lowercase()));
        }
        for (k, v) in &self.add {
            result.insert(k.clone(), v.clone());
        }
        result
    }
}
