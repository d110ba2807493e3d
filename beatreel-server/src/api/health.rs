//! Health check endpoint

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::services::tool_resolver::Tool;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when ffmpeg/ffprobe are missing
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    pub active_runs: usize,
    /// Availability of each external tool
    pub tools: BTreeMap<&'static str, bool>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let mut tools = BTreeMap::new();
    for tool in Tool::ALL {
        tools.insert(tool.name(), state.tools.is_available(tool).await);
    }
    let essential = [Tool::Ffmpeg, Tool::Ffprobe]
        .iter()
        .all(|t| tools.get(t.name()).copied().unwrap_or(false));

    Json(HealthResponse {
        status: if essential { "ok" } else { "degraded" }.to_string(),
        module: "beatreel-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds,
        active_runs: state.orchestrator.runs().active_count(),
        tools,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
