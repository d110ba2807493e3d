//! Stage-chain selection
//!
//! Per-image (or per-slot) clip rendering is the expensive part of a run.
//! When every clip from an earlier run is still on disk, the orchestrator
//! picks an assemble-only chain that skips straight to the final join.
//!
//! Precedence:
//! 1. Scavenger-hunt projects: per-slot clips
//! 2. Emotional audio mode: per-image clips, crossfade chain
//! 3. Everything else: per-image clips, beat-synced chain

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::models::{AudioMode, ProjectRecord, ProjectVariant, SlotBoard};

/// A predefined pipeline script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageChain {
    StandardFull,
    StandardAssemble,
    EmotionalFull,
    EmotionalAssemble,
    ScavengerHuntFull,
    ScavengerHuntAssemble,
}

impl StageChain {
    pub fn script_name(&self) -> &'static str {
        match self {
            StageChain::StandardFull => "process_single_project.sh",
            StageChain::StandardAssemble => "process_from_temp_videos.sh",
            StageChain::EmotionalFull => "process_single_emotional.sh",
            StageChain::EmotionalAssemble => "process_emotional_from_temp_videos.sh",
            StageChain::ScavengerHuntFull => "process_scavenger_hunt.sh",
            StageChain::ScavengerHuntAssemble => "process_scavenger_hunt_from_temp_videos.sh",
        }
    }

    /// True for the assemble-only chains that consume existing clips
    pub fn is_fast_path(&self) -> bool {
        matches!(
            self,
            StageChain::StandardAssemble
                | StageChain::EmotionalAssemble
                | StageChain::ScavengerHuntAssemble
        )
    }

    /// The render-everything chain of the same family
    pub fn full(&self) -> StageChain {
        match self {
            StageChain::StandardFull | StageChain::StandardAssemble => StageChain::StandardFull,
            StageChain::EmotionalFull | StageChain::EmotionalAssemble => StageChain::EmotionalFull,
            StageChain::ScavengerHuntFull | StageChain::ScavengerHuntAssemble => {
                StageChain::ScavengerHuntFull
            }
        }
    }
}

/// Selected chain plus the clips a fast chain depends on
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub chain: StageChain,
    /// Empty for full chains
    pub artifacts: Vec<PathBuf>,
}

impl StagePlan {
    fn full(chain: StageChain) -> Self {
        Self {
            chain: chain.full(),
            artifacts: Vec::new(),
        }
    }

    /// Re-check that every clip the fast chain needs is still present
    ///
    /// The selection is advisory: clips can vanish between selection and
    /// launch (cleanup, re-upload). Full chains always verify.
    pub async fn verify(&self) -> Result<(), PathBuf> {
        for artifact in &self.artifacts {
            if !fs::try_exists(artifact).await.unwrap_or(false) {
                return Err(artifact.clone());
            }
        }
        Ok(())
    }

    /// Same family, full render
    pub fn fall_back(&self) -> Self {
        Self::full(self.chain)
    }
}

/// Pick the chain for a run
///
/// * `images` - image file names currently in the project directory
/// * `slots` - the slot board, for scavenger-hunt projects
pub async fn select_plan(
    dir: &Path,
    record: &ProjectRecord,
    mode: AudioMode,
    images: &[String],
    slots: Option<&SlotBoard>,
) -> StagePlan {
    let (fast, clips) = match (record.variant, mode) {
        (ProjectVariant::ScavengerHunt, _) => {
            let clips = slots.map(|board| {
                board
                    .occupied()
                    .map(|slot| slot.temp_video.clone())
                    .collect::<Vec<_>>()
            });
            (StageChain::ScavengerHuntAssemble, clips.unwrap_or_default())
        }
        (_, AudioMode::Emotional) => (StageChain::EmotionalAssemble, image_clips(record, images)),
        (_, AudioMode::Normal) => (StageChain::StandardAssemble, image_clips(record, images)),
    };

    // Nothing to assemble never qualifies for the fast path
    if clips.is_empty() {
        return StagePlan::full(fast);
    }

    let mut artifacts = Vec::with_capacity(clips.len());
    for clip in clips {
        let Some(name) = clip else {
            return StagePlan::full(fast);
        };
        let path = dir.join(name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return StagePlan::full(fast);
        }
        artifacts.push(path);
    }

    StagePlan {
        chain: fast,
        artifacts,
    }
}

/// Linked clip per image file, in listing order
fn image_clips(record: &ProjectRecord, images: &[String]) -> Vec<Option<String>> {
    images
        .iter()
        .map(|name| record.image(name).and_then(|entry| entry.temp_video.clone()))
        .collect()
}
