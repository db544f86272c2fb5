//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, trace header list, static root
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Route, CORS and header entries are not checked here; the route table
//!   builder rejects them one by one

use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::GatewayConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}'", value)));
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
        }
    }

    let gateway = &config.gateway;
    if gateway.trace_headers.iter().all(|h| h.trim().is_empty()) {
        errors.push(ValidationError::new("gateway.trace_headers", "at least one header is required"));
    }
    if let Some(root) = &gateway.static_root {
        if !Path::new(root).is_dir() {
            errors.push(ValidationError::new("gateway.static_root", format!("'{}' is not a directory", root)));
        }
    }
    if gateway.default_document.trim().is_empty() || gateway.default_document.contains('/') {
        errors.push(ValidationError::new("gateway.default_document", "must be a plain file name"));
    }
    if gateway.max_buffered_body == 0 {
        errors.push(ValidationError::new("gateway.max_buffered_body", "must be greater than 0"));
    }
    if gateway.stream_ttl_secs == 0 {
        errors.push(ValidationError::new("gateway.stream_ttl_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
