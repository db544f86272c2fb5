//! Dispatch-time errors and their HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::bus::BusError;

/// Errors surfaced to the HTTP caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Resource not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Service {0} not reachable")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Timeout for {0} seconds")]
    Timeout(u64),

    /// A service replied with an error status.
    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("{0}")]
    Internal(String),
}

/// JSON error body. `status` mirrors the HTTP status code.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub status: u16,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            GatewayError::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn payload(&self, path: Option<&str>) -> ErrorPayload {
        ErrorPayload {
            status: self.status().as_u16(),
            message: self.to_string(),
            kind: "error".to_string(),
            path: path.map(str::to_string),
        }
    }

    /// Render with the request path included in the body.
    pub fn into_response_for(self, path: &str) -> Response {
        (self.status(), Json(self.payload(Some(path)))).into_response()
    }
}

impl From<BusError> for GatewayError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::NotReachable(service) => GatewayError::ServiceUnavailable(service),
            BusError::MissingAddress => GatewayError::Internal(e.to_string()),
            BusError::Timeout(secs) => GatewayError::Timeout(secs),
            BusError::Remote { status, message } => GatewayError::Remote { status, message },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.payload(None))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(GatewayError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(GatewayError::ServiceUnavailable("a.b".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(GatewayError::Timeout(5).status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            GatewayError::Remote { status: 999, message: "x".into() }.status(),
            StatusCode::from_u16(999).unwrap()
        );
        assert_eq!(
            GatewayError::Remote { status: 42, message: "x".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn payload_shape() {
        let p = GatewayError::ServiceUnavailable("v1.api.auth".into()).payload(Some("/api/x"));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], 503);
        assert_eq!(json["message"], "Service v1.api.auth not reachable");
        assert_eq!(json["type"], "error");
        assert_eq!(json["path"], "/api/x");
    }

    #[test]
    fn bus_errors_map_to_gateway_errors() {
        assert_eq!(
            GatewayError::from(BusError::Timeout(30)).to_string(),
            "Timeout for 30 seconds"
        );
        assert!(matches!(
            GatewayError::from(BusError::NotReachable("a.b".into())),
            GatewayError::ServiceUnavailable(_)
        ));
    }
}
