//! Upload handlers
//!
//! POST /api/upload/:id/{images,audio,youtube,youtube-download,scavenger-hunt-slot},
//! GET /api/upload/:id/scavenger-hunt-slots,
//! DELETE /api/upload/:id/files/:filename

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::SlotBoard;
use crate::services::beat_detector::spawn_detection;
use crate::services::registry::{
    has_extension, is_safe_component, IMAGE_EXTENSIONS, METADATA_FILE, SLOTS_FILE,
    UPLOAD_AUDIO_EXTENSIONS, UPLOAD_IMAGE_EXTENSIONS,
};
use crate::services::slots;
use crate::services::stream_download::{self, DownloadOutcome, DownloadRequest};
use crate::services::uploads::{
    is_heic, normalize_heic, sanitize_filename, StagedUpload, StoredFile, MAX_FILES_PER_REQUEST,
    MAX_FILE_BYTES,
};
use crate::AppState;

use super::projects::MessageResponse;

#[derive(Debug, Serialize)]
pub struct UploadImagesResponse {
    pub message: String,
    pub files: Vec<StoredFile>,
}

#[derive(Debug, Serialize)]
pub struct UploadAudioResponse {
    pub message: String,
    pub file: StoredFile,
}

#[derive(Debug, Deserialize)]
pub struct StreamUrlRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct StreamUrlResponse {
    pub message: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotUploadResponse {
    pub message: String,
    pub slot: u8,
    pub file: StoredFile,
    pub slots: SlotBoard,
}

/// Stream one multipart field into a staging file next to its destination
async fn receive_field(field: &mut Field<'_>, dir: &FsPath) -> ApiResult<StagedUpload> {
    let mut staged = StagedUpload::create(dir, MAX_FILE_BYTES).await?;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = staged.write(&chunk).await {
                    staged.discard().await;
                    return Err(e.into());
                }
            }
            Ok(None) => return Ok(staged),
            Err(e) => {
                staged.discard().await;
                return Err(e.into());
            }
        }
    }
}

fn upload_name(field: &Field<'_>) -> String {
    sanitize_filename(field.file_name().unwrap_or_default())
}

/// POST /api/upload/:id/images
///
/// Multipart field `images`, repeated. HEIC/HEIF uploads are converted to
/// JPEG when a converter is installed.
pub async fn upload_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadImagesResponse>> {
    let dir = state.registry.existing_dir(&id).await?;
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("images") {
            continue;
        }
        if files.len() >= MAX_FILES_PER_REQUEST {
            return Err(ApiError::BadRequest(format!(
                "At most {} images per upload",
                MAX_FILES_PER_REQUEST
            )));
        }

        let name = upload_name(&field);
        if !has_extension(&name, UPLOAD_IMAGE_EXTENSIONS) {
            return Err(ApiError::BadRequest(format!(
                "Invalid file type '{}'. Only JPEG, PNG and HEIC images are allowed.",
                name
            )));
        }

        let staged = receive_field(&mut field, &dir).await?;
        let size = staged.size();
        let hash = staged.commit(&dir.join(&name)).await?;

        let mut file = StoredFile::new(&id, &name, size, Some(hash.clone()));
        if is_heic(&name) {
            if let Some(jpeg) = normalize_heic(&state.tools, &dir, &name).await {
                let jpeg_size = fs::metadata(dir.join(&jpeg)).await.map(|m| m.len()).unwrap_or(size);
                file = StoredFile::new(&id, &jpeg, jpeg_size, Some(hash.clone()));
                file.converted_from = Some(name);
            }
        }

        state
            .registry
            .record_image_upload(&id, &file.name, Some(hash))
            .await?;
        files.push(file);
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }

    info!(project_id = %id, count = files.len(), "Uploaded images");
    Ok(Json(UploadImagesResponse {
        message: "Images uploaded successfully".to_string(),
        files,
    }))
}

/// POST /api/upload/:id/audio
///
/// Multipart field `audio`. Beat detection runs afterwards in a detached
/// task; its outcome arrives over the event stream.
pub async fn upload_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadAudioResponse>> {
    let dir = state.registry.existing_dir(&id).await?;

    let mut stored = None;
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("audio") || stored.is_some() {
            continue;
        }
        let name = upload_name(&field);
        if !has_extension(&name, UPLOAD_AUDIO_EXTENSIONS) {
            return Err(ApiError::BadRequest(format!(
                "Invalid file type '{}'. Only MP3, WAV, M4A and AAC audio is allowed.",
                name
            )));
        }

        let staged = receive_field(&mut field, &dir).await?;
        let size = staged.size();
        let hash = staged.commit(&dir.join(&name)).await?;
        stored = Some(StoredFile::new(&id, &name, size, Some(hash)));
    }

    let file = stored.ok_or_else(|| ApiError::BadRequest("No audio file uploaded".to_string()))?;
    state.registry.touch(&id).await;
    info!(project_id = %id, file = %file.name, bytes = file.size, "Uploaded audio");

    spawn_detection(
        state.registry.clone(),
        Arc::clone(&state.tools),
        state.event_bus.clone(),
        id,
        dir,
        file.name.clone(),
    );

    Ok(Json(UploadAudioResponse {
        message: "Audio uploaded successfully".to_string(),
        file,
    }))
}

/// POST /api/upload/:id/youtube
pub async fn save_youtube_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StreamUrlRequest>,
) -> ApiResult<Json<StreamUrlResponse>> {
    let url = stream_download::save_stream_url(&state.registry, &id, &request.url).await?;
    Ok(Json(StreamUrlResponse {
        message: "YouTube URL saved successfully".to_string(),
        url,
    }))
}

/// POST /api/upload/:id/youtube-download
///
/// Runs the whole download chain before responding.
pub async fn download_youtube_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadOutcome>> {
    let outcome =
        stream_download::download_audio(&state.registry, &state.tools, &id, request).await?;
    Ok(Json(outcome))
}

/// Fields of a scavenger-hunt slot upload
#[derive(Default)]
struct SlotForm {
    slot: Option<String>,
    image: Option<(String, StagedUpload)>,
}

async fn read_slot_form(multipart: &mut Multipart, dir: &FsPath) -> ApiResult<SlotForm> {
    let mut form = SlotForm::default();
    if let Err(e) = fill_slot_form(multipart, dir, &mut form).await {
        if let Some((_, upload)) = form.image.take() {
            upload.discard().await;
        }
        return Err(e);
    }
    Ok(form)
}

async fn fill_slot_form(
    multipart: &mut Multipart,
    dir: &FsPath,
    form: &mut SlotForm,
) -> ApiResult<()> {
    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("slot") => form.slot = Some(field.text().await?),
            Some("image") if form.image.is_none() => {
                let name = upload_name(&field);
                if !has_extension(&name, IMAGE_EXTENSIONS) {
                    return Err(ApiError::BadRequest(format!(
                        "Invalid file type '{}'. Only JPEG, PNG and HEIC images are allowed.",
                        name
                    )));
                }
                let upload = receive_field(&mut field, dir).await?;
                form.image = Some((name, upload));
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_slot(text: Option<&str>) -> ApiResult<u8> {
    let text = text
        .map(str::trim)
        .ok_or_else(|| ApiError::BadRequest("Slot number is required".to_string()))?;
    let slot = text
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid slot number '{}'", text)))?;
    Ok(SlotBoard::validate_index(slot)?)
}

/// POST /api/upload/:id/scavenger-hunt-slot
///
/// Multipart fields `slot` (1..=12) and `image`. The image is staged until
/// the slot board accepts it, so a rejected upload leaves nothing behind.
pub async fn upload_slot_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<SlotUploadResponse>> {
    let dir = state.registry.existing_dir(&id).await?;
    slots::require_scavenger_hunt(&state.registry, &id).await?;

    let form = read_slot_form(&mut multipart, &dir).await?;
    let slot = match parse_slot(form.slot.as_deref()) {
        Ok(slot) => slot,
        Err(e) => {
            if let Some((_, upload)) = form.image {
                upload.discard().await;
            }
            return Err(e);
        }
    };
    let (name, upload) = form
        .image
        .ok_or_else(|| ApiError::BadRequest("No image uploaded".to_string()))?;

    let board = match slots::assign_slot(&state.registry, &id, i64::from(slot), &name).await {
        Ok(board) => board,
        Err(e) => {
            upload.discard().await;
            return Err(e.into());
        }
    };

    let size = upload.size();
    let hash = match upload.commit(&dir.join(&name)).await {
        Ok(hash) => hash,
        Err(e) => {
            if let Err(clear) = slots::clear_file(&state.registry, &id, &name).await {
                warn!(project_id = %id, error = %clear, "Failed to roll back slot assignment");
            }
            return Err(e.into());
        }
    };

    info!(project_id = %id, slot, file = %name, "Uploaded scavenger hunt image");
    Ok(Json(SlotUploadResponse {
        message: format!("Image assigned to slot {}", slot),
        slot,
        file: StoredFile::new(&id, &name, size, Some(hash)),
        slots: board,
    }))
}

/// GET /api/upload/:id/scavenger-hunt-slots
pub async fn get_slots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SlotBoard>> {
    Ok(Json(slots::load_board(&state.registry, &id).await?))
}

/// DELETE /api/upload/:id/files/:filename
pub async fn delete_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    if !is_safe_component(&filename) || filename.starts_with('.') {
        return Err(ApiError::BadRequest(format!("Invalid file name '{}'", filename)));
    }
    if filename == METADATA_FILE || filename == SLOTS_FILE {
        return Err(ApiError::BadRequest(format!("'{}' cannot be deleted", filename)));
    }

    let dir = state.registry.existing_dir(&id).await?;
    match fs::remove_file(dir.join(&filename)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found".to_string()))
        }
        Err(e) => return Err(ApiError::Io(e)),
    }

    if has_extension(&filename, UPLOAD_IMAGE_EXTENSIONS) {
        state.registry.forget_image(&id, &filename).await?;
        slots::clear_file(&state.registry, &id, &filename).await?;
    } else {
        state.registry.touch(&id).await;
    }

    info!(project_id = %id, file = %filename, "Deleted project file");
    Ok(MessageResponse::new("File deleted successfully"))
}

/// Build upload routes
///
/// Multipart routes lift the default body limit; the per-file limit is
/// enforced while streaming each field to disk.
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/upload/:id/images",
            post(upload_images).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/upload/:id/audio",
            post(upload_audio).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/upload/:id/youtube", post(save_youtube_url))
        .route("/api/upload/:id/youtube-download", post(download_youtube_audio))
        .route(
            "/api/upload/:id/scavenger-hunt-slot",
            post(upload_slot_image).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/upload/:id/scavenger-hunt-slots", get(get_slots))
        .route("/api/upload/:id/files/:filename", delete(delete_file))
}
