//! Admin API.
//!
//! # Responsibilities
//! - Report gateway status
//! - Expose the compiled route table and in-flight requests
//!
//! # Design Decisions
//! - Served on its own listener, never on the gateway port
//! - Every endpoint requires the configured Bearer API key

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::bus::StreamRegistry;
use crate::dispatch::Correlator;
use crate::http::HttpServer;
use crate::routing::SharedRouteTable;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub routes: SharedRouteTable,
    pub correlator: Arc<Correlator>,
    pub streams: Arc<StreamRegistry>,
    pub reply_to: Arc<str>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn from_server(server: &HttpServer, api_key: &str) -> Self {
        let state = server.state();
        Self {
            routes: state.routes.clone(),
            correlator: Arc::clone(&state.correlator),
            streams: Arc::clone(&state.streams),
            reply_to: Arc::clone(&state.reply_to),
            api_key: api_key.into(),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/pending", get(get_pending))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
