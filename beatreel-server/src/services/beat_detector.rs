//! Downbeat detection
//!
//! The detector is an external script invoked as
//! `<detector> <audio> <out.json>`. It writes
//! `{"success": bool, "downbeats": [seconds...], "count": n, "error": "..."}`
//! to the output file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use beatreel_common::events::{EventBus, ProgressEvent};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::registry::ProjectRegistry;
use super::tool_invoker::{self, ToolError};
use super::tool_resolver::{Tool, ToolResolver};

/// Detector output file, kept in the project directory
pub const DETECTION_FILE: &str = "downbeats.json";

#[derive(Debug, Deserialize)]
struct DetectorReport {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    downbeats: Vec<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Run the detector on `audio`, writing its report to `report_path`
pub async fn detect_downbeats(
    tools: &ToolResolver,
    audio: &Path,
    report_path: &Path,
) -> Result<Vec<f64>, ToolError> {
    let detector = tools
        .resolve(Tool::BeatDetector)
        .await
        .ok_or_else(|| ToolError::Unavailable(Tool::BeatDetector.to_string()))?;

    let cmd = detector
        .command()
        .arg(audio.to_string_lossy())
        .arg(report_path.to_string_lossy());
    let program = cmd.program_name();
    let output = tool_invoker::run_to_completion(&cmd).await?;

    let invalid = |reason: String| ToolError::InvalidOutput {
        program: program.clone(),
        reason,
        output: output.stdout.clone(),
    };

    let bytes = tokio::fs::read(report_path)
        .await
        .map_err(|e| invalid(format!("no report written: {}", e)))?;
    let report: DetectorReport =
        serde_json::from_slice(&bytes).map_err(|e| invalid(format!("unreadable report: {}", e)))?;

    if !report.success {
        return Err(invalid(
            report.error.unwrap_or_else(|| "detector reported failure".to_string()),
        ));
    }

    let mut downbeats: Vec<f64> = report.downbeats.into_iter().filter(|t| t.is_finite()).collect();
    downbeats.sort_by(|a, b| a.total_cmp(b));
    Ok(downbeats)
}

/// Detect downbeats in the background after an audio upload
///
/// Nobody awaits the result: it only updates the project record and
/// publishes progress events.
pub fn spawn_detection(
    registry: ProjectRegistry,
    tools: Arc<ToolResolver>,
    events: EventBus,
    project_id: String,
    dir: PathBuf,
    audio_name: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        events.publish(ProgressEvent::processing(
            &project_id,
            format!("Analyzing beats in {}...", audio_name),
            None,
        ));

        let audio = dir.join(&audio_name);
        let report = dir.join(DETECTION_FILE);
        match detect_downbeats(&tools, &audio, &report).await {
            Ok(downbeats) => {
                let count = downbeats.len();
                match registry.set_downbeats(&project_id, downbeats).await {
                    Ok(_) => {
                        info!(project_id = %project_id, count, "Stored detected downbeats");
                        events.publish(ProgressEvent::processing(
                            &project_id,
                            format!("Beat detection complete: {} downbeats found", count),
                            None,
                        ));
                    }
                    Err(e) => {
                        warn!(project_id = %project_id, error = %e, "Failed to store downbeats");
                    }
                }
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Beat detection failed");
                events.publish(ProgressEvent::processing(
                    &project_id,
                    format!("Beat detection unavailable: {}", e),
                    None,
                ));
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::services::tool_resolver::ToolCandidate;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_detector(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("detector.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn resolver_for(detector: &Path) -> ToolResolver {
        ToolResolver::empty().with_candidates(
            Tool::BeatDetector,
            vec![ToolCandidate::new("/bin/sh")
                .prefix(&[detector.to_str().unwrap()])
                .probe(&["-c", "exit 0"])],
        )
    }

    #[tokio::test]
    async fn test_reads_detector_report() {
        let tmp = TempDir::new().unwrap();
        let detector = write_detector(
            tmp.path(),
            r#"echo '{"success": true, "downbeats": [2.0, 0.5, 4.0], "count": 3}' > "$2""#,
        );

        let downbeats = detect_downbeats(
            &resolver_for(&detector),
            &tmp.path().join("audio.mp3"),
            &tmp.path().join(DETECTION_FILE),
        )
        .await
        .unwrap();
        assert_eq!(downbeats, vec![0.5, 2.0, 4.0]);
    }

    #[tokio::test]
    async fn test_reported_failure_is_error() {
        let tmp = TempDir::new().unwrap();
        let detector = write_detector(
            tmp.path(),
            r#"echo '{"success": false, "error": "no beats"}' > "$2""#,
        );

        let err = detect_downbeats(
            &resolver_for(&detector),
            &tmp.path().join("audio.mp3"),
            &tmp.path().join(DETECTION_FILE),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no beats"));
    }

    #[tokio::test]
    async fn test_missing_detector() {
        let tmp = TempDir::new().unwrap();
        let err = detect_downbeats(
            &ToolResolver::empty(),
            &tmp.path().join("audio.mp3"),
            &tmp.path().join(DETECTION_FILE),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_background_detection_updates_record() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Trip", None).await.unwrap();
        let dir = registry.project_dir(&record.id).unwrap();
        let detector = write_detector(
            tmp.path(),
            r#"echo '{"success": true, "downbeats": [1.0, 3.0], "count": 2}' > "$2""#,
        );
        let events = EventBus::new(16);
        let mut rx = events.subscribe();

        spawn_detection(
            registry.clone(),
            Arc::new(resolver_for(&detector)),
            events.clone(),
            record.id.clone(),
            dir,
            "audio.mp3".to_string(),
        )
        .await
        .unwrap();

        let stored = registry.load_record(&record.id).await.unwrap();
        assert_eq!(stored.downbeats, Some(vec![1.0, 3.0]));
        assert_eq!(stored.downbeat_count, Some(2));

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let beatreel_common::events::ReelEvent::Progress(p) = event;
            messages.push(p.message);
        }
        assert!(messages.iter().any(|m| m.contains("2 downbeats")));
    }
}
