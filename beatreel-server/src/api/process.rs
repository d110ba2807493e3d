//! Pipeline run handlers
//!
//! POST /api/process/:id/process, GET /api/process/:id/status,
//! POST /api/process/:id/cancel, GET /api/process/:id/download

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::fs;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::services::orchestrator::{RunState, StartOptions, StartedRun};
use crate::services::registry::FINAL_VIDEO_FILE;
use crate::AppState;

use super::projects::MessageResponse;

static DOWNLOAD_NAME_UNSAFE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").expect("valid regex"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessResponse {
    pub message: String,
    #[serde(flatten)]
    pub run: StartedRun,
}

/// GET /api/process/:id/status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub project_id: String,
    pub is_processing: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Attachment name for the finished video
pub fn download_filename(project_name: &str) -> String {
    format!(
        "{}_slideshow.mp4",
        DOWNLOAD_NAME_UNSAFE.replace_all(project_name, "_")
    )
}

/// POST /api/process/:id/process
///
/// Body is optional: `{audioOffset?, audioType?}` override the stored
/// settings for this run only. Returns once the run slot is reserved;
/// progress is reported over `/events`.
pub async fn start_processing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    options: Option<Json<StartOptions>>,
) -> ApiResult<Json<StartProcessResponse>> {
    let options = options.map(|Json(o)| o).unwrap_or_default();
    let run = state.orchestrator.start(&id, options).await?;
    Ok(Json(StartProcessResponse {
        message: "Slideshow processing started".to_string(),
        run,
    }))
}

/// GET /api/process/:id/status
pub async fn process_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<StatusResponse> {
    let run_state = state.orchestrator.status(&id);
    Json(StatusResponse {
        started_at: state.orchestrator.runs().started_at(&id),
        is_processing: run_state == RunState::Running,
        status: run_state.label(),
        project_id: id,
    })
}

/// POST /api/process/:id/cancel
pub async fn cancel_processing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.orchestrator.cancel(&id)?;
    Ok(MessageResponse::new("Process cancelled successfully"))
}

/// GET /api/process/:id/download
pub async fn download_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let dir = state.registry.existing_dir(&id).await?;
    let path = dir.join(FINAL_VIDEO_FILE);
    let file = match fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(
                "Video not found. Please process the slideshow first.".to_string(),
            ))
        }
        Err(e) => return Err(ApiError::Io(e)),
    };
    let length = file.metadata().await?.len();

    let name = match state.registry.load_record(&id).await {
        Ok(record) => record.name,
        Err(_) => id.clone(),
    };
    let disposition = format!("attachment; filename=\"{}\"", download_filename(&name));

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Build process routes
pub fn process_routes() -> Router<AppState> {
    Router::new()
        .route("/api/process/:id/process", post(start_processing))
        .route("/api/process/:id/status", get(process_status))
        .route("/api/process/:id/cancel", post(cancel_processing))
        .route("/api/process/:id/download", get(download_video))
}
