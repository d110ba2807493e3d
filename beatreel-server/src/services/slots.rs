//! Scavenger-hunt slot assignment

use beatreel_common::atomic_file;
use beatreel_common::Error as RecordError;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{ProjectVariant, SlotBoard, SlotError};

use super::registry::ProjectRegistry;

#[derive(Debug, Error)]
pub enum SlotAssignError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("Project '{0}' is not a scavenger hunt")]
    WrongVariant(String),
}

/// Current board, repaired to 12 slots; empty when `slots.json` is absent
pub async fn load_board(registry: &ProjectRegistry, project_id: &str) -> Result<SlotBoard, RecordError> {
    registry.existing_dir(project_id).await?;
    let board = atomic_file::read_json::<SlotBoard>(&registry.slots_path(project_id)?)
        .await?
        .unwrap_or_default();
    Ok(board.normalized())
}

/// Reject early when the project cannot hold slots
pub async fn require_scavenger_hunt(
    registry: &ProjectRegistry,
    project_id: &str,
) -> Result<(), SlotAssignError> {
    let record = registry.load_record(project_id).await?;
    if record.variant != ProjectVariant::ScavengerHunt {
        return Err(SlotAssignError::WrongVariant(project_id.to_string()));
    }
    Ok(())
}

/// Put `filename` into `slot`
///
/// The board is left unchanged when another slot already holds the same
/// filename.
pub async fn assign_slot(
    registry: &ProjectRegistry,
    project_id: &str,
    slot: i64,
    filename: &str,
) -> Result<SlotBoard, SlotAssignError> {
    let index = SlotBoard::validate_index(slot)?;
    require_scavenger_hunt(registry, project_id).await?;
    let path = registry.slots_path(project_id)?;

    let mut replaced = None;
    let board = atomic_file::update_json(
        &path,
        |board: SlotBoard| {
            let mut board = board.normalized();
            replaced = board.assign(index, filename)?;
            Ok::<_, SlotAssignError>(board)
        },
        SlotBoard::empty(),
    )
    .await?;

    info!(
        project_id = %project_id,
        slot = index,
        file = %filename,
        replaced = ?replaced,
        "Assigned scavenger hunt slot"
    );
    registry.touch(project_id).await;
    Ok(board)
}

/// Empty any slot holding `filename`; projects without a board are skipped
pub async fn clear_file(
    registry: &ProjectRegistry,
    project_id: &str,
    filename: &str,
) -> Result<usize, RecordError> {
    let path = registry.slots_path(project_id)?;
    let Some(board) = atomic_file::read_json::<SlotBoard>(&path).await? else {
        return Ok(0);
    };

    let mut board = board.normalized();
    let cleared = board.clear_file(filename);
    if cleared > 0 {
        atomic_file::write_json(&path, &board).await?;
        debug!(project_id = %project_id, file = %filename, cleared, "Cleared slots for deleted file");
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn hunt() -> (TempDir, ProjectRegistry, String) {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Hunt", Some("Scavenger-Hunt")).await.unwrap();
        (tmp, registry, record.id)
    }

    #[tokio::test]
    async fn test_assign_persists() {
        let (_tmp, registry, id) = hunt().await;
        assign_slot(&registry, &id, 3, "a.jpg").await.unwrap();

        let board = load_board(&registry, &id).await.unwrap();
        assert_eq!(board.get(3).and_then(|s| s.filename.as_deref()), Some("a.jpg"));
    }

    #[tokio::test]
    async fn test_duplicate_leaves_board_unchanged() {
        let (_tmp, registry, id) = hunt().await;
        assign_slot(&registry, &id, 1, "dup.jpg").await.unwrap();
        let before = load_board(&registry, &id).await.unwrap();

        let result = assign_slot(&registry, &id, 2, "dup.jpg").await;
        assert!(matches!(
            result,
            Err(SlotAssignError::Slot(SlotError::Duplicate { slot: 1, .. }))
        ));
        assert_eq!(load_board(&registry, &id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let (_tmp, registry, id) = hunt().await;
        let result = assign_slot(&registry, &id, 13, "a.jpg").await;
        assert!(matches!(result, Err(SlotAssignError::Slot(SlotError::OutOfRange(13)))));
    }

    #[tokio::test]
    async fn test_standard_project_has_no_slots() {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path().join("projects"));
        let record = registry.create("Plain", None).await.unwrap();

        let result = assign_slot(&registry, &record.id, 1, "a.jpg").await;
        assert!(matches!(result, Err(SlotAssignError::WrongVariant(_))));
        assert_eq!(clear_file(&registry, &record.id, "a.jpg").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_file() {
        let (_tmp, registry, id) = hunt().await;
        assign_slot(&registry, &id, 7, "gone.jpg").await.unwrap();

        assert_eq!(clear_file(&registry, &id, "gone.jpg").await.unwrap(), 1);
        let board = load_board(&registry, &id).await.unwrap();
        assert_eq!(board.occupied().count(), 0);
    }
}
