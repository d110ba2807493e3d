//! Upload storage helpers
//!
//! Uploads are streamed into a hidden staging file inside the project
//! directory while their SHA-256 is computed, then renamed into place.
//! A rejected or interrupted upload never leaves a partial file under its
//! final name.

use std::path::{Path, PathBuf};

use beatreel_common::{Error, Result};
use rand::Rng;
use thiserror::Error as ThisError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::registry::FileRef;
use super::tool_invoker;
use super::tool_resolver::{Tool, ToolResolver};

pub const MAX_FILES_PER_REQUEST: usize = 100;
pub const MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, ThisError)]
pub enum UploadError {
    #[error("File exceeds the {limit_mb} MB limit")]
    TooLarge { limit_mb: u64 },

    #[error(transparent)]
    Record(#[from] Error),
}

/// Replace everything outside `[A-Za-z0-9.-]` with `_`
///
/// A leading dot is replaced as well so uploads can never become hidden
/// files or `..`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.starts_with('.') {
        sanitized.replace_range(0..1, "_");
    }
    if sanitized.is_empty() {
        sanitized.push_str("upload");
    }
    sanitized
}

/// File stored for one upload
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Set when a HEIC/HEIF image was converted to JPEG
    #[serde(rename = "convertedFrom", skip_serializing_if = "Option::is_none")]
    pub converted_from: Option<String>,
}

impl StoredFile {
    pub fn new(project_id: &str, name: &str, size: u64, hash: Option<String>) -> Self {
        let file_ref = FileRef::new(project_id, name);
        Self {
            name: file_ref.name,
            size,
            url: file_ref.url,
            hash,
            converted_from: None,
        }
    }
}

/// Size-limited, hashing writer into a staging file
pub struct StagedUpload {
    path: PathBuf,
    file: fs::File,
    hasher: Sha256,
    size: u64,
    limit: u64,
}

impl StagedUpload {
    pub async fn create(dir: &Path, limit: u64) -> Result<Self> {
        let tag: u64 = rand::thread_rng().gen();
        let path = dir.join(format!(".upload.{:016x}.tmp", tag));
        let file = fs::File::create(&path).await?;
        Ok(Self {
            path,
            file,
            hasher: Sha256::new(),
            size: 0,
            limit,
        })
    }

    /// Append a chunk; fails once the size limit is exceeded
    pub async fn write(&mut self, chunk: &[u8]) -> std::result::Result<(), UploadError> {
        self.size += chunk.len() as u64;
        if self.size > self.limit {
            return Err(UploadError::TooLarge {
                limit_mb: self.limit / (1024 * 1024),
            });
        }
        self.hasher.update(chunk);
        self.file.write_all(chunk).await.map_err(Error::Io)?;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush, then rename onto `target`; returns the hex SHA-256
    pub async fn commit(mut self, target: &Path) -> Result<String> {
        let result = async {
            self.file.flush().await?;
            self.file.sync_all().await?;
            fs::rename(&self.path, target).await
        }
        .await;
        if let Err(e) = result {
            remove_quietly(&self.path).await;
            return Err(Error::Io(e));
        }
        debug!(file = %target.display(), bytes = self.size, "Stored upload");
        Ok(hex(&self.hasher.finalize()))
    }

    pub async fn discard(self) {
        drop(self.file);
        remove_quietly(&self.path).await;
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "Failed to remove staged upload");
        }
    }
}

pub fn is_heic(name: &str) -> bool {
    super::registry::has_extension(name, &["heic", "heif"])
}

/// Convert a HEIC/HEIF image in `dir` to JPEG
///
/// Returns the new file name, or `None` when no converter is available or
/// conversion failed; the original file is kept in that case.
pub async fn normalize_heic(tools: &ToolResolver, dir: &Path, name: &str) -> Option<String> {
    let converter = tools.resolve(Tool::HeicConverter).await?;

    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let jpeg_name = format!("{}.jpg", stem);
    let source = dir.join(name);
    let target = dir.join(&jpeg_name);

    let cmd = converter
        .command()
        .arg(source.to_string_lossy())
        .arg(target.to_string_lossy());
    match tool_invoker::run_to_completion(&cmd).await {
        Ok(_) if fs::try_exists(&target).await.unwrap_or(false) => {
            remove_quietly(&source).await;
            info!(from = %name, to = %jpeg_name, "Converted HEIC image to JPEG");
            Some(jpeg_name)
        }
        Ok(_) => {
            warn!(file = %name, "HEIC converter produced no output, keeping original");
            None
        }
        Err(e) => {
            warn!(file = %name, error = %e, "HEIC conversion failed, keeping original");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Photo (1).JPG"), "My_Photo__1_.JPG");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\evil.png"), "evil.png");
        assert_eq!(sanitize_filename(".hidden.png"), "_hidden.png");
        assert_eq!(sanitize_filename(".."), "_.");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("song-final.mp3"), "song-final.mp3");
    }

    #[tokio::test]
    async fn test_staged_upload_commit() {
        let dir = TempDir::new().unwrap();
        let mut staged = StagedUpload::create(dir.path(), 1024).await.unwrap();
        staged.write(b"hello ").await.unwrap();
        staged.write(b"world").await.unwrap();
        assert_eq!(staged.size(), 11);

        let target = dir.path().join("a.jpg");
        let hash = staged.commit(&target).await.unwrap();
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(std::fs::read(&target).unwrap(), b"hello world");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_staged_upload_limit() {
        let dir = TempDir::new().unwrap();
        let mut staged = StagedUpload::create(dir.path(), 4).await.unwrap();
        assert!(staged.write(b"1234").await.is_ok());
        assert!(matches!(staged.write(b"5").await, Err(UploadError::TooLarge { .. })));
        staged.discard().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_heic_kept_without_converter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("IMG_1.HEIC"), b"heic").unwrap();
        let converted = normalize_heic(&ToolResolver::empty(), dir.path(), "IMG_1.HEIC").await;
        assert!(converted.is_none());
        assert!(dir.path().join("IMG_1.HEIC").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_heic_converted() {
        use crate::services::tool_resolver::ToolCandidate;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("IMG_1.HEIC"), b"heic").unwrap();
        let tools = ToolResolver::empty().with_candidates(
            Tool::HeicConverter,
            vec![ToolCandidate::new("/bin/cp").lenient()],
        );

        let converted = normalize_heic(&tools, dir.path(), "IMG_1.HEIC").await;
        assert_eq!(converted.as_deref(), Some("IMG_1.jpg"));
        assert!(dir.path().join("IMG_1.jpg").exists());
        assert!(!dir.path().join("IMG_1.HEIC").exists());
    }
}
