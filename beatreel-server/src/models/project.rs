//! Project record (`metadata.json`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use beatreel_common::timecode::DEFAULT_OFFSET;

use super::AudioAnalysis;

/// Structural slideshow type, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectVariant {
    #[default]
    #[serde(rename = "Standard")]
    Standard,
    #[serde(rename = "Emotional-Crossfade")]
    EmotionalCrossfade,
    #[serde(rename = "Scavenger-Hunt")]
    ScavengerHunt,
}

impl ProjectVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectVariant::Standard => "Standard",
            ProjectVariant::EmotionalCrossfade => "Emotional-Crossfade",
            ProjectVariant::ScavengerHunt => "Scavenger-Hunt",
        }
    }

    /// Parse a client-supplied variant; anything unrecognized is `Standard`.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for ProjectVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Standard" => Ok(ProjectVariant::Standard),
            "Emotional-Crossfade" => Ok(ProjectVariant::EmotionalCrossfade),
            "Scavenger-Hunt" => Ok(ProjectVariant::ScavengerHunt),
            other => Err(format!("unknown project type '{}'", other)),
        }
    }
}

/// Audio timing mode: beat-synced or crossfade-timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    #[default]
    Normal,
    Emotional,
}

impl AudioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioMode::Normal => "normal",
            AudioMode::Emotional => "emotional",
        }
    }
}

impl FromStr for AudioMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(AudioMode::Normal),
            "emotional" => Ok(AudioMode::Emotional),
            other => Err(format!("unknown audio type '{}'", other)),
        }
    }
}

/// One uploaded image and its pre-rendered clip, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub original_name: String,
    /// Per-image clip rendered by an earlier run (`temp_*.mp4`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

impl ImageEntry {
    pub fn new(original_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            temp_video: None,
            hash: None,
            uploaded_at: Utc::now(),
        }
    }
}

/// Project record persisted as `metadata.json`
///
/// Unknown fields written by older versions are dropped on the next write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub variant: ProjectVariant,
    #[serde(rename = "audioType", default)]
    pub audio_mode: AudioMode,
    #[serde(default = "default_offset")]
    pub audio_offset: String,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downbeats: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downbeat_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_analysis: Option<AudioAnalysis>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "lastProcessed", skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
}

fn default_offset() -> String {
    DEFAULT_OFFSET.to_string()
}

impl ProjectRecord {
    /// Fresh record for a newly created project
    ///
    /// Emotional-crossfade projects start in emotional audio mode.
    pub fn new(id: impl Into<String>, name: impl Into<String>, variant: ProjectVariant) -> Self {
        let now = Utc::now();
        let audio_mode = match variant {
            ProjectVariant::EmotionalCrossfade => AudioMode::Emotional,
            _ => AudioMode::Normal,
        };
        Self {
            id: id.into(),
            name: name.into(),
            variant,
            audio_mode,
            audio_offset: default_offset(),
            images: Vec::new(),
            image_order: None,
            downbeats: None,
            downbeat_count: None,
            audio_analysis: None,
            created_at: now,
            updated_at: now,
            last_processed_at: None,
        }
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Image names in display order (`imageOrder` wins when present)
    pub fn ordered_image_names(&self) -> Vec<String> {
        match &self.image_order {
            Some(order) => order.clone(),
            None => self.images.iter().map(|i| i.original_name.clone()).collect(),
        }
    }

    pub fn image(&self, name: &str) -> Option<&ImageEntry> {
        self.images.iter().find(|i| i.original_name == name)
    }
}
