//! Project registry
//!
//! One directory per project under the root folder. The directory name is
//! the project id; `metadata.json` inside it holds the [`ProjectRecord`].
//! Display state (has video, has audio) is derived by combining the record
//! with a directory listing at read time, never stored.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use beatreel_common::atomic_file;
use beatreel_common::timecode;
use beatreel_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    AudioAnalysis, AudioMode, ImageEntry, ProjectRecord, ProjectVariant, SlotBoard,
};

pub const METADATA_FILE: &str = "metadata.json";
pub const SLOTS_FILE: &str = "slots.json";
/// Pending streaming-source URL
pub const AUDIO_URL_FILE: &str = "audio.txt";
/// Final assembled slideshow
pub const FINAL_VIDEO_FILE: &str = "slideshow.mp4";
/// Prefix of per-image / per-slot pre-rendered clips
pub const TEMP_VIDEO_PREFIX: &str = "temp_";

/// Image extensions a pipeline run accepts
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic"];
/// Image extensions accepted on upload (HEIF is converted or kept as-is)
pub const UPLOAD_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif"];
/// Audio extensions a pipeline run accepts
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];
/// Audio extensions accepted on upload and by analysis
pub const UPLOAD_AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac"];

/// Case-insensitive extension check
pub fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Fresh project id: `<unix millis>-<8 hex chars>`
pub fn generate_project_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &uuid[..8])
}

/// A file inside a project, addressable through the static file route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRef {
    pub name: String,
    pub url: String,
}

impl FileRef {
    pub fn new(project_id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: format!("/api/files/{}/{}", project_id, name),
        }
    }
}

/// Row of the project listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub variant: ProjectVariant,
    #[serde(rename = "audioType")]
    pub audio_mode: AudioMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Full record plus classified directory listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetails {
    #[serde(flatten)]
    pub record: ProjectRecord,
    pub image_files: Vec<FileRef>,
    pub audio_file: Option<FileRef>,
    pub video_file: Option<FileRef>,
    pub youtube_url: Option<String>,
    pub has_video: bool,
}

/// Partial update accepted by `PUT /api/projects/{id}`
///
/// The project type is deliberately absent: it is fixed at creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProject {
    pub name: Option<String>,
    #[serde(alias = "audioType")]
    pub audio_mode: Option<AudioMode>,
    pub audio_offset: Option<String>,
}

/// Directory-backed project store
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    root: PathBuf,
}

impl ProjectRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root folder if needed
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Directory for `id`, rejecting ids that could escape the root
    pub fn project_dir(&self, id: &str) -> Result<PathBuf> {
        if !is_safe_component(id) {
            return Err(Error::InvalidInput(format!("Invalid project id '{}'", id)));
        }
        Ok(self.root.join(id))
    }

    /// Directory for `id`, which must exist
    pub async fn existing_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.project_dir(id)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(not_found(id)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(id)),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn metadata_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.project_dir(id)?.join(METADATA_FILE))
    }

    pub fn slots_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.project_dir(id)?.join(SLOTS_FILE))
    }

    /// All projects, most recently updated first
    pub async fn list(&self) -> Result<Vec<ProjectSummary>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut projects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name().to_string_lossy().into_owned();
            if id.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }

            let dir = entry.path();
            let record = match self.read_record_in(&dir, &id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(project_id = %id, error = %e, "Skipping unreadable project");
                    continue;
                }
            };
            let files = list_files(&dir).await?;

            projects.push(ProjectSummary {
                id,
                name: record.name,
                variant: record.variant,
                audio_mode: record.audio_mode,
                created_at: record.created_at,
                updated_at: record.updated_at,
                last_processed_at: record.last_processed_at,
                has_video: files.iter().any(|f| f == FINAL_VIDEO_FILE),
                has_audio: has_audio_source(&files),
            });
        }

        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(projects)
    }

    /// Create a project. An unrecognized `variant` becomes `Standard`.
    ///
    /// The initial record write is critical: if it fails the directory is
    /// removed again and the error is returned.
    pub async fn create(&self, name: &str, variant: Option<&str>) -> Result<ProjectRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Project name is required".to_string()));
        }
        let variant = ProjectVariant::parse_or_default(variant);

        self.ensure_root().await?;
        let id = generate_project_id();
        let dir = self.project_dir(&id)?;
        fs::create_dir_all(&dir).await?;

        let record = ProjectRecord::new(&id, name, variant);
        if let Err(e) = self.write_initial_files(&dir, &record).await {
            if let Err(cleanup) = fs::remove_dir_all(&dir).await {
                warn!(project_id = %id, error = %cleanup, "Failed to remove half-created project");
            }
            return Err(e);
        }

        info!(project_id = %id, variant = variant.as_str(), "Created project");
        Ok(record)
    }

    async fn write_initial_files(&self, dir: &Path, record: &ProjectRecord) -> Result<()> {
        atomic_file::write_json(&dir.join(METADATA_FILE), record).await?;
        if record.variant == ProjectVariant::ScavengerHunt {
            atomic_file::write_json(&dir.join(SLOTS_FILE), &SlotBoard::empty()).await?;
        }
        Ok(())
    }

    /// Record plus classified directory listing
    pub async fn get(&self, id: &str) -> Result<ProjectDetails> {
        let dir = self.existing_dir(id).await?;
        let record = self.read_record_in(&dir, id).await?;
        let files = list_files(&dir).await?;

        let image_files = files
            .iter()
            .filter(|f| has_extension(f, IMAGE_EXTENSIONS))
            .map(|f| FileRef::new(id, f))
            .collect();
        let audio_file = files
            .iter()
            .find(|f| has_extension(f, AUDIO_EXTENSIONS))
            .map(|f| FileRef::new(id, f));
        let has_video = files.iter().any(|f| f == FINAL_VIDEO_FILE);
        let video_file = has_video.then(|| FileRef::new(id, FINAL_VIDEO_FILE));
        let youtube_url = read_audio_url(&dir).await?;

        Ok(ProjectDetails {
            record,
            image_files,
            audio_file,
            video_file,
            youtube_url,
            has_video,
        })
    }

    /// Stored record for an existing project (directory-name fallback when
    /// `metadata.json` is missing)
    pub async fn load_record(&self, id: &str) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        self.read_record_in(&dir, id).await
    }

    async fn read_record_in(&self, dir: &Path, id: &str) -> Result<ProjectRecord> {
        match atomic_file::read_json::<ProjectRecord>(&dir.join(METADATA_FILE)).await? {
            Some(record) => Ok(record),
            None => fallback_record(dir, id).await,
        }
    }

    /// Merge `changes` into the record and bump `updatedAt`
    pub async fn update(&self, id: &str, changes: UpdateProject) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;

        let name = match changes.name {
            Some(name) if name.trim().is_empty() => {
                return Err(Error::InvalidInput("Project name cannot be empty".to_string()))
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };
        let offset = changes
            .audio_offset
            .as_deref()
            .map(timecode::normalize_offset)
            .transpose()?;

        let updated = self
            .mutate_record_in(&dir, id, move |mut record| {
                if let Some(name) = name {
                    record.name = name;
                }
                if let Some(mode) = changes.audio_mode {
                    record.audio_mode = mode;
                }
                if let Some(offset) = offset {
                    record.audio_offset = offset;
                }
                Ok(record)
            })
            .await?;

        debug!(project_id = %id, "Updated project");
        Ok(updated)
    }

    /// Remove the project directory. A directory that is already gone is
    /// not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let dir = self.project_dir(id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(project_id = %id, "Deleted project");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(project_id = %id, "Project already deleted");
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Rewrite the image list in `order`
    ///
    /// Entries keep their `tempVideo` and `hash` by original name regardless
    /// of position; names with no prior entry get a fresh entry.
    pub async fn reorder(&self, id: &str, order: Vec<String>) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        if let Some(bad) = order.iter().find(|n| !is_safe_component(n)) {
            return Err(Error::InvalidInput(format!("Invalid image name '{}'", bad)));
        }

        self.mutate_record_in(&dir, id, move |mut record| {
            let mut previous = std::mem::take(&mut record.images);
            record.images = order
                .iter()
                .map(|name| {
                    match previous.iter().position(|entry| &entry.original_name == name) {
                        Some(pos) => previous.swap_remove(pos),
                        None => ImageEntry::new(name.clone()),
                    }
                })
                .collect();
            record.image_order = Some(order);
            Ok(record)
        })
        .await
    }

    /// Best-effort `updatedAt` bump after a side operation (upload, delete)
    ///
    /// The primary operation already succeeded, so a failure here is only
    /// logged.
    pub async fn touch(&self, id: &str) {
        let result = match self.existing_dir(id).await {
            Ok(dir) => self.mutate_record_in(&dir, id, Ok).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(project_id = %id, error = %e, "Failed to bump project updatedAt");
        }
    }

    /// Add or refresh the entry for an uploaded image
    ///
    /// A changed hash invalidates the image's pre-rendered clip.
    pub async fn record_image_upload(
        &self,
        id: &str,
        name: &str,
        hash: Option<String>,
    ) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        let name = name.to_string();
        self.mutate_record_in(&dir, id, move |mut record| {
            match record.images.iter_mut().find(|i| i.original_name == name) {
                Some(entry) => {
                    if entry.hash != hash {
                        entry.temp_video = None;
                    }
                    entry.hash = hash;
                    entry.uploaded_at = Utc::now();
                }
                None => {
                    let mut entry = ImageEntry::new(name.clone());
                    entry.hash = hash;
                    record.images.push(entry);
                    if let Some(order) = record.image_order.as_mut() {
                        order.push(name);
                    }
                }
            }
            Ok(record)
        })
        .await
    }

    /// Drop a deleted image from the record
    pub async fn forget_image(&self, id: &str, name: &str) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        let name = name.to_string();
        self.mutate_record_in(&dir, id, move |mut record| {
            record.images.retain(|i| i.original_name != name);
            if let Some(order) = record.image_order.as_mut() {
                order.retain(|n| n != &name);
            }
            Ok(record)
        })
        .await
    }

    /// Stamp a successful pipeline run
    pub async fn mark_processed(&self, id: &str) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        self.mutate_record_in(&dir, id, |mut record| {
            record.last_processed_at = Some(Utc::now());
            Ok(record)
        })
        .await
    }

    pub async fn set_downbeats(&self, id: &str, downbeats: Vec<f64>) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        self.mutate_record_in(&dir, id, move |mut record| {
            record.downbeat_count = Some(downbeats.len());
            record.downbeats = Some(downbeats);
            Ok(record)
        })
        .await
    }

    pub async fn set_audio_analysis(
        &self,
        id: &str,
        analysis: AudioAnalysis,
    ) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        self.mutate_record_in(&dir, id, move |mut record| {
            record.audio_analysis = Some(analysis);
            Ok(record)
        })
        .await
    }

    pub async fn set_audio_offset(&self, id: &str, offset: &str) -> Result<ProjectRecord> {
        let dir = self.existing_dir(id).await?;
        let offset = timecode::normalize_offset(offset)?;
        self.mutate_record_in(&dir, id, move |mut record| {
            record.audio_offset = offset;
            Ok(record)
        })
        .await
    }

    /// Read-modify-write of `metadata.json`, always bumping `updatedAt`
    async fn mutate_record_in<F>(&self, dir: &Path, id: &str, mutate: F) -> Result<ProjectRecord>
    where
        F: FnOnce(ProjectRecord) -> Result<ProjectRecord>,
    {
        let default = fallback_record(dir, id).await?;
        atomic_file::update_json(
            &dir.join(METADATA_FILE),
            |record| {
                let mut record = mutate(record)?;
                record.touch();
                Ok(record)
            },
            default,
        )
        .await
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("Project '{}' not found", id))
}

/// Single path component that cannot escape its parent directory
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Record for a project directory without `metadata.json`
async fn fallback_record(dir: &Path, id: &str) -> Result<ProjectRecord> {
    let mut record = ProjectRecord::new(id, id, ProjectVariant::Standard);
    if let Ok(meta) = fs::metadata(dir).await {
        let modified = meta.modified().ok().map(to_utc);
        let created = meta.created().ok().map(to_utc).or(modified);
        if let Some(created) = created {
            record.created_at = created;
        }
        if let Some(modified) = modified {
            record.updated_at = modified;
        }
    }
    Ok(record)
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Regular file names in `dir`, sorted
pub async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// An uploaded audio file or a saved streaming URL
pub fn has_audio_source(files: &[String]) -> bool {
    files
        .iter()
        .any(|f| f == AUDIO_URL_FILE || has_extension(f, AUDIO_EXTENSIONS))
}

/// Trimmed contents of `audio.txt`, if present and non-empty
pub async fn read_audio_url(dir: &Path) -> Result<Option<String>> {
    match fs::read_to_string(dir.join(AUDIO_URL_FILE)).await {
        Ok(text) => {
            let url = text.trim();
            Ok((!url.is_empty()).then(|| url.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}
