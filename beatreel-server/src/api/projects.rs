//! Project CRUD handlers
//!
//! GET/POST /api/projects, GET/PUT/DELETE /api/projects/:id,
//! POST /api/projects/:id/reorder

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiResult;
use crate::models::ProjectRecord;
use crate::services::registry::{ProjectDetails, ProjectSummary, UpdateProject};
use crate::AppState;

/// POST /api/projects request
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub name: String,
    /// Project variant; unknown values fall back to `Standard`
    #[serde(rename = "type")]
    pub variant: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectResponse {
    #[serde(flatten)]
    pub record: ProjectRecord,
    pub has_video: bool,
}

/// POST /api/projects/:id/reorder request
#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// GET /api/projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<ProjectSummary>>> {
    Ok(Json(state.registry.list().await?))
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<Json<CreateProjectResponse>> {
    let record = state
        .registry
        .create(&request.name, request.variant.as_deref())
        .await?;
    Ok(Json(CreateProjectResponse {
        record,
        has_video: false,
    }))
}

/// GET /api/projects/:id
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectDetails>> {
    Ok(Json(state.registry.get(&id).await?))
}

/// PUT /api/projects/:id
pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<UpdateProject>,
) -> ApiResult<Json<ProjectRecord>> {
    Ok(Json(state.registry.update(&id, changes).await?))
}

/// DELETE /api/projects/:id
///
/// An active pipeline run is cancelled first.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.registry.project_dir(&id)?;
    if state.orchestrator.cancel(&id).is_ok() {
        info!(project_id = %id, "Cancelled run of deleted project");
    }
    state.registry.delete(&id).await?;
    Ok(MessageResponse::new("Project deleted successfully"))
}

/// POST /api/projects/:id/reorder
pub async fn reorder_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let record = state.registry.reorder(&id, request.images).await?;
    info!(project_id = %id, images = record.images.len(), "Reordered images");
    Ok(MessageResponse::new("Image order updated successfully"))
}

/// Build project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/projects/:id/reorder", post(reorder_images))
}
