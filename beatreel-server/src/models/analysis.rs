//! Audio requirement results
//!
//! Produced by the estimator and cached on the project record as
//! `audioAnalysis`. The cache is advisory only; nothing re-derives it from
//! rendered output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many images a slideshow needs and how they are timed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AudioRequirement {
    /// Crossfade-timed slideshow
    #[serde(rename_all = "camelCase")]
    Emotional {
        audio_duration: f64,
        required_images: usize,
        image_display_time: f64,
        crossfade_duration: f64,
        fade_in_duration: f64,
        fade_out_duration: f64,
    },
    /// One image per detected downbeat
    #[serde(rename_all = "camelCase")]
    BeatSynced {
        audio_duration: f64,
        required_images: usize,
        downbeats: Vec<f64>,
        average_beat_interval: f64,
    },
    /// Fixed-tempo estimate used when no detector result is available
    #[serde(rename_all = "camelCase")]
    TimeBased {
        audio_duration: f64,
        required_images: usize,
        seconds_per_image: f64,
        estimated_bpm: u32,
    },
}

impl AudioRequirement {
    pub fn required_images(&self) -> usize {
        match self {
            AudioRequirement::Emotional { required_images, .. }
            | AudioRequirement::BeatSynced { required_images, .. }
            | AudioRequirement::TimeBased { required_images, .. } => *required_images,
        }
    }

    pub fn audio_duration(&self) -> f64 {
        match self {
            AudioRequirement::Emotional { audio_duration, .. }
            | AudioRequirement::BeatSynced { audio_duration, .. }
            | AudioRequirement::TimeBased { audio_duration, .. } => *audio_duration,
        }
    }

    /// Human-readable summary for the client
    pub fn summary(&self) -> String {
        let seconds = self.audio_duration().floor() as u64;
        match self {
            AudioRequirement::Emotional { required_images, .. } => format!(
                "You need {} images for this {}s emotional slideshow",
                required_images, seconds
            ),
            AudioRequirement::BeatSynced { required_images, .. } => format!(
                "You need {} images for this beat-synced slideshow (one per downbeat)",
                required_images
            ),
            AudioRequirement::TimeBased { required_images, .. } => format!(
                "You need approximately {} images for this {}s slideshow (estimated without beat detection)",
                required_images, seconds
            ),
        }
    }
}

/// Estimator result as persisted on the project record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    #[serde(flatten)]
    pub requirement: AudioRequirement,
    pub analyzed_at: DateTime<Utc>,
}

impl AudioAnalysis {
    pub fn new(requirement: AudioRequirement) -> Self {
        Self {
            requirement,
            analyzed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_shape() {
        let analysis = AudioAnalysis::new(AudioRequirement::TimeBased {
            audio_duration: 130.0,
            required_images: 65,
            seconds_per_image: 2.0,
            estimated_bpm: 120,
        });
        let json = serde_json::to_value(&analysis).unwrap();

        assert_eq!(json["type"], "time-based");
        assert_eq!(json["requiredImages"], 65);
        assert_eq!(json["secondsPerImage"], 2.0);
        assert!(json["analyzedAt"].is_string());

        let back: AudioAnalysis = serde_json::from_value(json).unwrap();
        assert_eq!(back, analysis);
    }

    #[test]
    fn test_summary_mentions_count() {
        let req = AudioRequirement::Emotional {
            audio_duration: 60.4,
            required_images: 27,
            image_display_time: 3.11,
            crossfade_duration: 3.0,
            fade_in_duration: 2.0,
            fade_out_duration: 3.0,
        };
        assert_eq!(req.summary(), "You need 27 images for this 60s emotional slideshow");
    }
}
