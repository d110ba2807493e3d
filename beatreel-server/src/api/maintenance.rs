//! Maintenance handlers
//!
//! POST /api/maintenance/cleanup removes pre-rendered clips no record links
//! to anymore. Projects with an active run are left alone.

use axum::{extract::State, routing::post, Json, Router};

use crate::error::ApiResult;
use crate::services::cleanup::{cleanup_all, CleanupReport};
use crate::AppState;

/// POST /api/maintenance/cleanup
pub async fn cleanup_clips(State(state): State<AppState>) -> ApiResult<Json<CleanupReport>> {
    let runs = state.orchestrator.runs();
    let report = cleanup_all(state.registry.root(), |id| runs.is_running(id)).await?;
    Ok(Json(report))
}

/// Build maintenance routes
pub fn maintenance_routes() -> Router<AppState> {
    Router::new().route("/api/maintenance/cleanup", post(cleanup_clips))
}
