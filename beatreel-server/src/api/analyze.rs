//! Audio analysis handler
//!
//! POST /api/analyze/:id/analyze

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::models::AudioMode;
use crate::services::analysis::{analyze_project, AnalysisOutcome};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Defaults to the project's stored audio mode
    pub audio_type: Option<AudioMode>,
}

/// POST /api/analyze/:id/analyze
pub async fn analyze(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<AnalyzeRequest>>,
) -> ApiResult<Json<AnalysisOutcome>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let mode = match request.audio_type {
        Some(mode) => mode,
        None => state.registry.load_record(&id).await?.audio_mode,
    };
    let outcome = analyze_project(&state.registry, &state.tools, &id, mode).await?;
    Ok(Json(outcome))
}

/// Build analyze routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/api/analyze/:id/analyze", post(analyze))
}
