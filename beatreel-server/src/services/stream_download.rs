//! Streaming-source audio
//!
//! Two entry points:
//! - [`save_stream_url`] only records the URL in `audio.txt`; the pipeline
//!   script fetches it later.
//! - [`download_audio`] runs the whole chain synchronously and reports the
//!   outcome to the caller directly:
//!
//! ```text
//! yt-dlp (mp3) -> ffmpeg (44.1 kHz stereo mp3) -> trim -> detect
//! ```
//!
//! Trimming happens when a duration is requested, and always for scavenger
//! hunts. Download, convert and trim failures abort the chain. Detection is
//! optional: a missing or failing detector leaves the audio in place.

use std::fmt;
use std::path::{Path, PathBuf};

use beatreel_common::atomic_file;
use beatreel_common::timecode::{self, DEFAULT_OFFSET};
use beatreel_common::Error as RecordError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::models::ProjectVariant;

use super::beat_detector::{detect_downbeats, DETECTION_FILE};
use super::registry::{FileRef, ProjectRegistry, AUDIO_URL_FILE};
use super::tool_invoker::{self, ToolError};
use super::tool_resolver::{Tool, ToolResolver};

/// Final audio file produced by the chain
pub const DOWNLOADED_AUDIO_FILE: &str = "audio.mp3";
/// Shortest audio a scavenger-hunt slideshow accepts, in seconds
pub const SCAVENGER_HUNT_MIN_SECONDS: f64 = 73.0;

const RAW_DOWNLOAD_STEM: &str = "stream_download";
const CONVERTED_FILE: &str = "stream_converted.mp3";

static STREAM_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be|music\.youtube\.com)/.+$")
        .expect("valid regex")
});

/// True for URLs of a supported streaming source
pub fn is_supported_url(url: &str) -> bool {
    STREAM_URL.is_match(url.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    Download,
    Convert,
    Trim,
}

impl fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DownloadStage::Download => "Audio download",
            DownloadStage::Convert => "Audio conversion",
            DownloadStage::Trim => "Audio trim",
        })
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("URL is required")]
    MissingUrl,

    #[error("Invalid YouTube URL")]
    InvalidUrl,

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: DownloadStage,
        #[source]
        source: ToolError,
    },
}

impl DownloadError {
    fn stage(stage: DownloadStage) -> impl FnOnce(ToolError) -> DownloadError {
        move |source| DownloadError::Stage { stage, source }
    }
}

/// Body of `POST /api/upload/{id}/youtube-download`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    /// Offset into the source audio, `mm:ss` or `hh:mm:ss`
    pub start_time: Option<String>,
    /// Requested length in seconds; scavenger hunts never go below
    /// [`SCAVENGER_HUNT_MIN_SECONDS`]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub message: String,
    pub file: FileRef,
    pub audio_offset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trimmed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downbeat_count: Option<usize>,
}

/// Validate and store `url` as the project's pending audio source
pub async fn save_stream_url(
    registry: &ProjectRegistry,
    project_id: &str,
    url: &str,
) -> Result<String, DownloadError> {
    let url = validate_url(url)?;
    let dir = registry.existing_dir(project_id).await?;
    atomic_file::write_bytes(&dir.join(AUDIO_URL_FILE), url.as_bytes()).await?;
    registry.touch(project_id).await;
    info!(project_id = %project_id, url = %url, "Saved streaming audio URL");
    Ok(url)
}

fn validate_url(url: &str) -> Result<String, DownloadError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(DownloadError::MissingUrl);
    }
    if !is_supported_url(url) {
        return Err(DownloadError::InvalidUrl);
    }
    Ok(url.to_string())
}

/// Run the download chain to completion
pub async fn download_audio(
    registry: &ProjectRegistry,
    tools: &ToolResolver,
    project_id: &str,
    request: DownloadRequest,
) -> Result<DownloadOutcome, DownloadError> {
    let url = validate_url(&request.url)?;
    let start = match request.start_time.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => timecode::parse_offset(s)?,
        _ => 0,
    };
    let dir = registry.existing_dir(project_id).await?;
    let record = registry.load_record(project_id).await?;

    atomic_file::write_bytes(&dir.join(AUDIO_URL_FILE), url.as_bytes()).await?;

    info!(project_id = %project_id, url = %url, "Downloading streaming audio");
    let raw = fetch(tools, &dir, &url)
        .await
        .map_err(DownloadError::stage(DownloadStage::Download))?;

    let converted = dir.join(CONVERTED_FILE);
    let conversion = convert(tools, &raw, &converted).await;
    remove_quietly(&raw).await;
    conversion.map_err(DownloadError::stage(DownloadStage::Convert))?;

    let target = dir.join(DOWNLOADED_AUDIO_FILE);
    let requested = request.duration.filter(|d| d.is_finite() && *d > 0.0);
    let length = if record.variant == ProjectVariant::ScavengerHunt {
        Some(requested.map_or(SCAVENGER_HUNT_MIN_SECONDS, |d| d.max(SCAVENGER_HUNT_MIN_SECONDS)))
    } else {
        requested
    };
    let (audio_offset, trimmed_seconds) = match length {
        Some(length) => {
            let trimmed = trim(tools, &converted, &target, start, length).await;
            remove_quietly(&converted).await;
            trimmed.map_err(DownloadError::stage(DownloadStage::Trim))?;
            // The trimmed file already starts at the requested offset
            (DEFAULT_OFFSET.to_string(), Some(length))
        }
        None => {
            fs::rename(&converted, &target).await.map_err(RecordError::Io)?;
            (timecode::format_offset(start), None)
        }
    };

    let downbeat_count =
        match detect_downbeats(tools, &target, &dir.join(DETECTION_FILE)).await {
            Ok(downbeats) => {
                let count = downbeats.len();
                if let Err(e) = registry.set_downbeats(project_id, downbeats).await {
                    warn!(project_id = %project_id, error = %e, "Failed to store downbeats");
                }
                Some(count)
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Skipping beat detection for downloaded audio");
                None
            }
        };

    if let Err(e) = registry.set_audio_offset(project_id, &audio_offset).await {
        warn!(project_id = %project_id, error = %e, "Failed to store audio offset");
    }

    info!(project_id = %project_id, ?trimmed_seconds, ?downbeat_count, "Streaming audio ready");
    Ok(DownloadOutcome {
        message: "Audio downloaded successfully".to_string(),
        file: FileRef::new(project_id, DOWNLOADED_AUDIO_FILE),
        audio_offset,
        trimmed_seconds,
        downbeat_count,
    })
}

async fn fetch(tools: &ToolResolver, dir: &Path, url: &str) -> Result<PathBuf, ToolError> {
    let ytdlp = tools
        .resolve(Tool::YtDlp)
        .await
        .ok_or_else(|| ToolError::Unavailable(Tool::YtDlp.to_string()))?;

    let template = dir.join(format!("{}.%(ext)s", RAW_DOWNLOAD_STEM));
    let cmd = ytdlp
        .command()
        .args(["-x", "--audio-format", "mp3", "--audio-quality", "0", "--no-playlist", "-o"])
        .arg(template.to_string_lossy())
        .arg(url)
        .current_dir(dir);
    let output = tool_invoker::run_to_completion(&cmd).await?;

    let raw = dir.join(format!("{}.mp3", RAW_DOWNLOAD_STEM));
    if !fs::try_exists(&raw).await.unwrap_or(false) {
        return Err(ToolError::InvalidOutput {
            program: cmd.program_name(),
            reason: "no audio file was produced".to_string(),
            output: output.stderr,
        });
    }
    debug!(file = %raw.display(), "Downloaded raw audio");
    Ok(raw)
}

async fn convert(tools: &ToolResolver, input: &Path, output: &Path) -> Result<(), ToolError> {
    let ffmpeg = tools
        .resolve(Tool::Ffmpeg)
        .await
        .ok_or_else(|| ToolError::Unavailable(Tool::Ffmpeg.to_string()))?;

    let cmd = ffmpeg
        .command()
        .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(input.to_string_lossy())
        .args(["-vn", "-ar", "44100", "-ac", "2", "-codec:a", "libmp3lame", "-q:a", "2"])
        .arg(output.to_string_lossy());
    tool_invoker::run_to_completion(&cmd).await?;
    Ok(())
}

async fn trim(
    tools: &ToolResolver,
    input: &Path,
    output: &Path,
    start_seconds: u64,
    length_seconds: f64,
) -> Result<(), ToolError> {
    let ffmpeg = tools
        .resolve(Tool::Ffmpeg)
        .await
        .ok_or_else(|| ToolError::Unavailable(Tool::Ffmpeg.to_string()))?;

    let cmd = ffmpeg
        .command()
        .args(["-y", "-hide_banner", "-loglevel", "error", "-ss"])
        .arg(start_seconds.to_string())
        .arg("-t")
        .arg(format!("{:.3}", length_seconds))
        .arg("-i")
        .arg(input.to_string_lossy())
        .args(["-codec:a", "libmp3lame", "-q:a", "2"])
        .arg(output.to_string_lossy());
    tool_invoker::run_to_completion(&cmd).await?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "Failed to remove intermediate audio");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_pattern() {
        assert!(is_supported_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_supported_url("http://youtu.be/abc"));
        assert!(is_supported_url("youtube.com/watch?v=abc"));
        assert!(is_supported_url("https://music.youtube.com/watch?v=abc"));
        assert!(!is_supported_url("https://vimeo.com/123"));
        assert!(!is_supported_url("https://www.youtube.com/"));
        assert!(!is_supported_url("ftp://youtube.com/x"));
    }

    #[test]
    fn test_validate_url() {
        assert!(matches!(validate_url("  "), Err(DownloadError::MissingUrl)));
        assert!(matches!(validate_url("nope"), Err(DownloadError::InvalidUrl)));
        assert_eq!(validate_url(" https://youtu.be/x ").unwrap(), "https://youtu.be/x");
    }

    #[cfg(unix)]
    mod chain {
        use super::super::*;
        use crate::services::tool_resolver::ToolCandidate;
        use tempfile::TempDir;

        /// Stand-in tools: yt-dlp writes the file named by `-o`, ffmpeg
        /// copies its input to the last argument.
        fn fake_tools(bin: &Path, ytdlp_exit: i32) -> ToolResolver {
            let ytdlp = bin.join("yt-dlp.sh");
            std::fs::write(
                &ytdlp,
                format!(
                    r#"while [ "$1" != "-o" ]; do shift; done
out=$(echo "$2" | sed 's/%(ext)s/mp3/')
echo "downloading" 1>&2
[ {code} -eq 0 ] && echo fake > "$out"
exit {code}
"#,
                    code = ytdlp_exit
                ),
            )
            .unwrap();

            let ffmpeg = bin.join("ffmpeg.sh");
            std::fs::write(
                &ffmpeg,
                r#"while [ "$1" != "-i" ]; do shift; done
in="$2"
for last; do :; done
cp "$in" "$last"
"#,
            )
            .unwrap();

            let script = |p: &Path| {
                ToolCandidate::new("/bin/sh")
                    .prefix(&[p.to_str().unwrap()])
                    .probe(&["-c", "exit 0"])
            };
            ToolResolver::empty()
                .with_candidates(Tool::YtDlp, vec![script(&ytdlp)])
                .with_candidates(Tool::Ffmpeg, vec![script(&ffmpeg)])
        }

        #[tokio::test]
        async fn test_standard_chain_keeps_offset() {
            let tmp = TempDir::new().unwrap();
            let registry = ProjectRegistry::new(tmp.path().join("projects"));
            let record = registry.create("Trip", None).await.unwrap();
            let tools = fake_tools(tmp.path(), 0);

            let outcome = download_audio(
                &registry,
                &tools,
                &record.id,
                DownloadRequest {
                    url: "https://youtu.be/abc".into(),
                    start_time: Some("1:30".into()),
                    duration: None,
                },
            )
            .await
            .unwrap();

            let dir = registry.project_dir(&record.id).unwrap();
            assert!(dir.join(DOWNLOADED_AUDIO_FILE).exists());
            assert!(!dir.join(CONVERTED_FILE).exists());
            assert!(!dir.join("stream_download.mp3").exists());
            assert_eq!(outcome.audio_offset, "01:30");
            assert!(outcome.trimmed_seconds.is_none());
            assert!(outcome.downbeat_count.is_none());

            let stored = registry.load_record(&record.id).await.unwrap();
            assert_eq!(stored.audio_offset, "01:30");
            let saved_url = std::fs::read_to_string(dir.join(AUDIO_URL_FILE)).unwrap();
            assert_eq!(saved_url, "https://youtu.be/abc");
        }

        #[tokio::test]
        async fn test_scavenger_hunt_trims_to_minimum() {
            let tmp = TempDir::new().unwrap();
            let registry = ProjectRegistry::new(tmp.path().join("projects"));
            let record = registry.create("Hunt", Some("Scavenger-Hunt")).await.unwrap();
            let tools = fake_tools(tmp.path(), 0);

            let outcome = download_audio(
                &registry,
                &tools,
                &record.id,
                DownloadRequest {
                    url: "https://youtu.be/abc".into(),
                    start_time: Some("00:10".into()),
                    duration: Some(30.0),
                },
            )
            .await
            .unwrap();

            assert_eq!(outcome.trimmed_seconds, Some(SCAVENGER_HUNT_MIN_SECONDS));
            assert_eq!(outcome.audio_offset, DEFAULT_OFFSET);
        }

        #[tokio::test]
        async fn test_requested_duration_trims_standard_project() {
            let tmp = TempDir::new().unwrap();
            let registry = ProjectRegistry::new(tmp.path().join("projects"));
            let record = registry.create("Trip", None).await.unwrap();
            let tools = fake_tools(tmp.path(), 0);

            let outcome = download_audio(
                &registry,
                &tools,
                &record.id,
                DownloadRequest {
                    url: "https://youtu.be/abc".into(),
                    start_time: Some("0:45".into()),
                    duration: Some(20.0),
                },
            )
            .await
            .unwrap();

            let dir = registry.project_dir(&record.id).unwrap();
            assert!(dir.join(DOWNLOADED_AUDIO_FILE).exists());
            assert!(!dir.join(CONVERTED_FILE).exists());
            assert_eq!(outcome.trimmed_seconds, Some(20.0));
            assert_eq!(outcome.audio_offset, DEFAULT_OFFSET);
            let stored = registry.load_record(&record.id).await.unwrap();
            assert_eq!(stored.audio_offset, DEFAULT_OFFSET);
        }

        #[tokio::test]
        async fn test_download_failure_carries_tool_output() {
            let tmp = TempDir::new().unwrap();
            let registry = ProjectRegistry::new(tmp.path().join("projects"));
            let record = registry.create("Trip", None).await.unwrap();
            let tools = fake_tools(tmp.path(), 1);

            let err = download_audio(
                &registry,
                &tools,
                &record.id,
                DownloadRequest {
                    url: "https://youtu.be/abc".into(),
                    ..DownloadRequest::default()
                },
            )
            .await
            .unwrap_err();

            match err {
                DownloadError::Stage { stage, source } => {
                    assert_eq!(stage, DownloadStage::Download);
                    assert!(source.output().unwrap_or_default().contains("downloading"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
