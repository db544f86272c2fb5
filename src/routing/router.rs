//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes, CORS policies and header transforms
//! - Resolve (method, URL) to a route, a 405 or a 404
//! - Publish the table behind an atomically swappable pointer
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) exact URL lookup via HashMap
//! - O(n) scan over wildcard URLs sorted alphabetically; first match wins
//! - A path match with the wrong method is still reported, so callers can answer 405

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::routing::matcher::{normalize_url, split_segments, UrlPattern};
use crate::routing::route::{AssignedRoute, CorsInfo, HeaderInfo, RouteInfo};

/// Outcome of a route lookup.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Matched(AssignedRoute),
    MethodNotAllowed,
    NotFound,
}

/// The compiled routing configuration.
#[derive(Debug, Default)]
pub struct RouteTable {
    /// "METHOD:url" -> route.
    pub(crate) routes: HashMap<String, Arc<RouteInfo>>,
    pub(crate) exact: HashSet<String>,
    /// Sorted by URL.
    pub(crate) patterns: Vec<UrlPattern>,
    pub(crate) cors: HashMap<String, CorsInfo>,
    pub(crate) request_headers: HashMap<String, HeaderInfo>,
    pub(crate) response_headers: HashMap<String, HeaderInfo>,
}

/// Summary row for admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub method: String,
    pub url: String,
    pub primary: String,
    pub services: Vec<String>,
    pub timeout_secs: u64,
    pub auth: Option<String>,
    pub tracing: bool,
}

pub(crate) fn route_key(method: &str, url: &str) -> String {
    format!("{}:{}", method, url)
}

impl RouteTable {
    /// Resolve a request method and path.
    pub fn find(&self, method: &str, url: &str) -> RouteMatch {
        let input = split_segments(url);
        let normalized = normalize_url(url);

        if self.exact.contains(&normalized) {
            return match self.routes.get(&route_key(method, &normalized)) {
                Some(info) => RouteMatch::Matched(AssignedRoute::new(Arc::clone(info))),
                None => RouteMatch::MethodNotAllowed,
            };
        }

        let mut similar = false;
        for pattern in &self.patterns {
            let Some(arguments) = pattern.matches(&input) else {
                continue;
            };
            if let Some(info) = self.routes.get(&route_key(method, pattern.url())) {
                return RouteMatch::Matched(AssignedRoute {
                    info: Arc::clone(info),
                    arguments,
                });
            }
            similar = true;
        }

        if similar {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    pub fn cors(&self, id: &str) -> Option<&CorsInfo> {
        self.cors.get(id)
    }

    pub fn request_transform(&self, id: &str) -> Option<&HeaderInfo> {
        self.request_headers.get(id)
    }

    pub fn response_transform(&self, id: &str) -> Option<&HeaderInfo> {
        self.response_headers.get(id)
    }

    /// Number of (method, url) entries, implicit OPTIONS included.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn exact_urls(&self) -> usize {
        self.exact.len()
    }

    /// Wildcard URLs in scan order.
    pub fn wildcard_urls(&self) -> Vec<&str> {
        self.patterns.iter().map(UrlPattern::url).collect()
    }

    /// All routes sorted by URL then method.
    pub fn summary(&self) -> Vec<RouteSummary> {
        let mut rows: Vec<RouteSummary> = self
            .routes
            .iter()
            .filter_map(|(key, info)| {
                let (method, url) = key.split_once(':')?;
                Some(RouteSummary {
                    method: method.to_string(),
                    url: url.to_string(),
                    primary: info.primary.clone(),
                    services: info.services.clone(),
                    timeout_secs: info.timeout_secs,
                    auth: info.default_auth_service.clone(),
                    tracing: info.tracing,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        rows
    }
}

/// Reloadable handle to the current route table.
///
/// Readers take a snapshot with [`SharedRouteTable::load`]; a reload swaps in a
/// fully built table so no reader ever sees a partial one.
#[derive(Debug, Clone)]
pub struct SharedRouteTable {
    inner: Arc<ArcSwap<RouteTable>>,
}

impl SharedRouteTable {
    pub fn new(table: RouteTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    pub fn load(&self) -> Arc<RouteTable> {
        self.inner.load_full()
    }

    pub fn swap(&self, table: RouteTable) {
        let routes = table.len();
        self.inner.store(Arc::new(table));
        tracing::info!(routes, "Route table swapped");
    }
}
