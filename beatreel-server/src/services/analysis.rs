//! Analyze flow: how many images does this project's audio need?

use beatreel_common::Error as RecordError;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AudioAnalysis, AudioMode, AudioRequirement};

use super::audio_probe::probe_duration;
use super::beat_detector::{detect_downbeats, DETECTION_FILE};
use super::estimator;
use super::registry::{has_extension, list_files, ProjectRegistry, UPLOAD_AUDIO_EXTENSIONS};
use super::tool_invoker::ToolError;
use super::tool_resolver::ToolResolver;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("No audio file found in project")]
    NoAudio,

    #[error("Failed to get audio duration: {0}")]
    Duration(#[source] ToolError),
}

/// Estimator result as returned to the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    #[serde(flatten)]
    pub requirement: AudioRequirement,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Probe the project's audio, estimate, and cache the result on the record
///
/// Caching is best-effort: the estimate is returned even when the record
/// write fails.
pub async fn analyze_project(
    registry: &ProjectRegistry,
    tools: &ToolResolver,
    project_id: &str,
    mode: AudioMode,
) -> Result<AnalysisOutcome, AnalysisError> {
    let dir = registry.existing_dir(project_id).await?;
    let audio_name = list_files(&dir)
        .await?
        .into_iter()
        .find(|f| has_extension(f, UPLOAD_AUDIO_EXTENSIONS))
        .ok_or(AnalysisError::NoAudio)?;
    let audio = dir.join(&audio_name);

    let duration = probe_duration(tools, &audio)
        .await
        .map_err(AnalysisError::Duration)?;

    let mut note = None;
    let requirement = match mode {
        AudioMode::Emotional => estimator::emotional(duration),
        AudioMode::Normal => match detect_downbeats(tools, &audio, &dir.join(DETECTION_FILE)).await {
            Ok(downbeats) => {
                if let Err(e) = registry.set_downbeats(project_id, downbeats.clone()).await {
                    warn!(project_id = %project_id, error = %e, "Failed to cache downbeats");
                }
                estimator::beat_synced(duration, downbeats)
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Beat detection failed, using time-based estimate");
                note = Some("Install Python with madmom for accurate beat detection".to_string());
                estimator::time_based(duration)
            }
        },
    };

    if let Err(e) = registry
        .set_audio_analysis(project_id, AudioAnalysis::new(requirement.clone()))
        .await
    {
        warn!(project_id = %project_id, error = %e, "Failed to cache audio analysis");
    }

    info!(
        project_id = %project_id,
        audio = %audio_name,
        duration,
        required_images = requirement.required_images(),
        "Analyzed project audio"
    );

    Ok(AnalysisOutcome {
        message: requirement.summary(),
        requirement,
        note,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::services::tool_resolver::{Tool, ToolCandidate};
    use tempfile::TempDir;

    fn fake_ffprobe(dir: &std::path::Path, seconds: &str) -> ToolResolver {
        let script = dir.join("ffprobe.sh");
        std::fs::write(&script, format!("echo {}\n", seconds)).unwrap();
        ToolResolver::empty().with_candidates(
            Tool::Ffprobe,
            vec![ToolCandidate::new("/bin/sh")
                .prefix(&[script.to_str().unwrap()])
                .probe(&["-c", "exit 0"])],
        )
    }

    #[tokio::test]
    async fn test_emotional_analysis_is_cached() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Trip", None).await.unwrap();
        let dir = registry.project_dir(&record.id).unwrap();
        std::fs::write(dir.join("song.mp3"), b"id3").unwrap();
        let tools = fake_ffprobe(tmp.path(), "60.0");

        let outcome = analyze_project(&registry, &tools, &record.id, AudioMode::Emotional)
            .await
            .unwrap();
        assert_eq!(outcome.requirement.required_images(), 27);
        assert!(outcome.note.is_none());

        let stored = registry.load_record(&record.id).await.unwrap();
        let cached = stored.audio_analysis.expect("analysis should be cached");
        assert_eq!(cached.requirement.required_images(), 27);
    }

    #[tokio::test]
    async fn test_normal_analysis_falls_back_without_detector() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Trip", None).await.unwrap();
        let dir = registry.project_dir(&record.id).unwrap();
        std::fs::write(dir.join("song.wav"), b"riff").unwrap();
        let tools = fake_ffprobe(tmp.path(), "130");

        let outcome = analyze_project(&registry, &tools, &record.id, AudioMode::Normal)
            .await
            .unwrap();
        assert!(matches!(outcome.requirement, AudioRequirement::TimeBased { .. }));
        assert_eq!(outcome.requirement.required_images(), 65);
        assert!(outcome.note.is_some());
    }

    #[tokio::test]
    async fn test_no_audio_file() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Trip", None).await.unwrap();

        let result =
            analyze_project(&registry, &ToolResolver::empty(), &record.id, AudioMode::Normal).await;
        assert!(matches!(result, Err(AnalysisError::NoAudio)));
    }
}
