//! Persisted data models
//!
//! - [`ProjectRecord`]: `metadata.json`, one per project
//! - [`SlotBoard`]: `slots.json`, scavenger-hunt projects only
//! - [`AudioAnalysis`]: advisory estimator cache stored on the record

pub mod analysis;
pub mod project;
pub mod slots;

pub use analysis::{AudioAnalysis, AudioRequirement};
pub use project::{AudioMode, ImageEntry, ProjectRecord, ProjectVariant};
pub use slots::{Slot, SlotBoard, SlotError, SLOT_COUNT};
