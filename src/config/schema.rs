//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//!
//! The `rest`, `cors` and `headers` sections stay as raw structured values:
//! the route table builder decodes each entry on its own so a single
//! malformed entry is skipped instead of rejecting the whole file.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Request dispatch settings.
    pub gateway: GatewaySettings,

    /// Built-in HTTP relay service.
    pub relay: RelayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Endpoint declarations.
    pub rest: Vec<Value>,

    /// CORS policy sets.
    pub cors: Vec<Value>,

    /// Header transform sets.
    pub headers: Vec<Value>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Request dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Instance origin. Replies are addressed to `async.http.response@<origin>`.
    /// A random id is generated when empty.
    pub origin: String,

    /// Headers searched, in order, for an incoming trace id.
    pub trace_headers: Vec<String>,

    /// Directory served for unmatched GET requests.
    pub static_root: Option<String>,

    /// File served for directory-style URLs.
    pub default_document: String,

    /// Upper bound for any buffered (non-streamed) body.
    pub max_buffered_body: usize,

    /// Unclaimed streams are deleted after this many seconds.
    pub stream_ttl_secs: u64,

    /// Spool directory for streams. System temp dir when unset.
    pub stream_dir: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            origin: String::new(),
            trace_headers: vec!["X-Trace-Id".to_string()],
            static_root: None,
            default_document: "index.html".to_string(),
            max_buffered_body: 8 * 1024 * 1024,
            stream_ttl_secs: 300,
            stream_dir: None,
        }
    }
}

/// Built-in HTTP relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Register the relay service for routes targeting external URLs.
    pub enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable Admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Bind address for Admin API.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
