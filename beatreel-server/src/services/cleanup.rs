//! Orphaned pre-rendered clip cleanup
//!
//! Runs leave `temp_*.mp4` clips behind for the fast path. A clip that no
//! image entry or slot links to anymore can never be reused and is removed.

use std::collections::HashSet;
use std::path::Path;

use beatreel_common::atomic_file;
use beatreel_common::Result;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::models::{ProjectRecord, SlotBoard};

use super::registry::{list_files, METADATA_FILE, SLOTS_FILE, TEMP_VIDEO_PREFIX};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCleanup {
    pub project_id: String,
    pub deleted: Vec<String>,
    pub kept: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub projects_scanned: usize,
    pub files_deleted: usize,
    pub projects: Vec<ProjectCleanup>,
}

fn is_temp_clip(name: &str) -> bool {
    name.starts_with(TEMP_VIDEO_PREFIX) && name.to_ascii_lowercase().ends_with(".mp4")
}

/// Remove unreferenced clips from one project directory
///
/// Returns `None` for directories without `metadata.json`: without a record
/// there is no way to tell which clips are still linked.
pub async fn cleanup_project(dir: &Path) -> Result<Option<ProjectCleanup>> {
    let Some(record) = atomic_file::read_json::<ProjectRecord>(&dir.join(METADATA_FILE)).await?
    else {
        return Ok(None);
    };
    let board = atomic_file::read_json::<SlotBoard>(&dir.join(SLOTS_FILE)).await?;

    let mut referenced: HashSet<String> = record
        .images
        .iter()
        .filter_map(|i| i.temp_video.clone())
        .collect();
    if let Some(board) = board {
        referenced.extend(board.slots().iter().filter_map(|s| s.temp_video.clone()));
    }

    let mut report = ProjectCleanup {
        project_id: record.id,
        ..ProjectCleanup::default()
    };
    for name in list_files(dir).await?.into_iter().filter(|n| is_temp_clip(n)) {
        if referenced.contains(&name) {
            report.kept += 1;
            continue;
        }
        match fs::remove_file(dir.join(&name)).await {
            Ok(()) => {
                debug!(project_id = %report.project_id, file = %name, "Removed orphaned clip");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(project_id = %report.project_id, file = %name, error = %e, "Failed to remove orphaned clip");
            }
        }
    }
    Ok(Some(report))
}

/// Clean every project under `root`, skipping those for which `skip` is true
pub async fn cleanup_all<F>(root: &Path, skip: F) -> Result<CleanupReport>
where
    F: Fn(&str) -> bool,
{
    let mut report = CleanupReport::default();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let id = entry.file_name().to_string_lossy().into_owned();
        if id.starts_with('.') || !entry.file_type().await?.is_dir() || skip(&id) {
            continue;
        }
        match cleanup_project(&entry.path()).await {
            Ok(Some(project)) => {
                report.projects_scanned += 1;
                report.files_deleted += project.deleted.len();
                if !project.deleted.is_empty() {
                    report.projects.push(project);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(project_id = %id, error = %e, "Cleanup skipped project"),
        }
    }

    info!(
        projects = report.projects_scanned,
        deleted = report.files_deleted,
        "Clip cleanup complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::ProjectRegistry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_removes_only_unreferenced_clips() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Hunt", Some("Scavenger-Hunt")).await.unwrap();
        let dir = registry.project_dir(&record.id).unwrap();

        registry.record_image_upload(&record.id, "a.jpg", None).await.unwrap();
        let mut stored: ProjectRecord =
            atomic_file::read_json(&dir.join(METADATA_FILE)).await.unwrap().unwrap();
        stored.images[0].temp_video = Some("temp_a.mp4".into());
        atomic_file::write_json(&dir.join(METADATA_FILE), &stored).await.unwrap();

        let board_json = r#"[{"slotIndex":1,"filename":"s.jpg","tempVideo":"temp_slot_1.mp4"}]"#;
        std::fs::write(dir.join(SLOTS_FILE), board_json).unwrap();

        for name in ["temp_a.mp4", "temp_slot_1.mp4", "temp_old.mp4", "slideshow.mp4"] {
            std::fs::write(dir.join(name), b"mp4").unwrap();
        }

        let report = cleanup_project(&dir).await.unwrap().unwrap();
        assert_eq!(report.deleted, vec!["temp_old.mp4".to_string()]);
        assert_eq!(report.kept, 2);
        assert!(dir.join("temp_a.mp4").exists());
        assert!(dir.join("temp_slot_1.mp4").exists());
        assert!(dir.join("slideshow.mp4").exists());
        assert!(!dir.join("temp_old.mp4").exists());
    }

    #[tokio::test]
    async fn test_skips_projects_without_metadata() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("legacy");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("temp_x.mp4"), b"mp4").unwrap();

        assert!(cleanup_project(&dir).await.unwrap().is_none());
        let report = cleanup_all(tmp.path(), |_| false).await.unwrap();
        assert_eq!(report.projects_scanned, 0);
        assert!(dir.join("temp_x.mp4").exists());
    }

    #[tokio::test]
    async fn test_cleanup_all_honours_skip() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path());
        let busy = registry.create("Busy", None).await.unwrap();
        let idle = registry.create("Idle", None).await.unwrap();
        for id in [&busy.id, &idle.id] {
            std::fs::write(registry.project_dir(id).unwrap().join("temp_x.mp4"), b"mp4").unwrap();
        }

        let busy_id = busy.id.clone();
        let report = cleanup_all(tmp.path(), |id| id == busy_id).await.unwrap();
        assert_eq!(report.projects_scanned, 1);
        assert_eq!(report.files_deleted, 1);
        assert!(registry.project_dir(&busy.id).unwrap().join("temp_x.mp4").exists());
        assert!(!registry.project_dir(&idle.id).unwrap().join("temp_x.mp4").exists());
    }

    #[tokio::test]
    async fn test_missing_root() {
        let tmp = TempDir::new().unwrap();
        let report = cleanup_all(&tmp.path().join("absent"), |_| false).await.unwrap();
        assert_eq!(report.projects_scanned, 0);
    }
}
