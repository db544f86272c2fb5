use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::dispatch::PendingSummary;
use crate::routing::RouteSummary;

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub reply_to: String,
    pub uptime_secs: u64,
    pub routes: usize,
    pub exact_urls: usize,
    pub wildcard_urls: Vec<String>,
    pub pending_requests: usize,
    pub open_streams: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let table = state.routes.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        reply_to: state.reply_to.to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        routes: table.len(),
        exact_urls: table.exact_urls(),
        wildcard_urls: table.wildcard_urls().into_iter().map(str::to_string).collect(),
        pending_requests: state.correlator.len(),
        open_streams: state.streams.len(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteSummary>> {
    Json(state.routes.load().summary())
}

pub async fn get_pending(State(state): State<AdminState>) -> Json<Vec<PendingSummary>> {
    Json(state.correlator.snapshot())
}
