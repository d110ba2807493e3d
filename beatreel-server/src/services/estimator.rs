//! Audio requirement estimator
//!
//! Pure functions from audio duration (and detector output, when there is
//! some) to the number of images a slideshow needs.

use crate::models::AudioRequirement;

pub const CROSSFADE_DURATION: f64 = 3.0;
pub const FADE_IN_DURATION: f64 = 2.0;
pub const FADE_OUT_DURATION: f64 = 3.0;
pub const MIN_EMOTIONAL_IMAGES: usize = 3;
/// Total time each image is on screen, crossfades included
pub const TARGET_VISIBLE_TIME: f64 = CROSSFADE_DURATION + 2.0;

pub const FALLBACK_BPM: u32 = 120;
pub const BEATS_PER_IMAGE: u32 = 4;

/// Crossfade-timed slideshow
///
/// `availableTime = duration - fadeIn - fadeOut`, one image per
/// `targetVisible - crossfade` seconds of it, never fewer than
/// [`MIN_EMOTIONAL_IMAGES`].
pub fn emotional(duration: f64) -> AudioRequirement {
    let available = duration - FADE_IN_DURATION - FADE_OUT_DURATION;
    let per_image = TARGET_VISIBLE_TIME - CROSSFADE_DURATION;
    let by_time = (available / per_image).floor();
    let images = if by_time.is_finite() && by_time > 0.0 {
        (by_time as usize).max(MIN_EMOTIONAL_IMAGES)
    } else {
        MIN_EMOTIONAL_IMAGES
    };

    let transition_time = (images - 1) as f64 * CROSSFADE_DURATION;
    let static_time = available - transition_time;
    let display_time = static_time / images as f64 + CROSSFADE_DURATION;

    AudioRequirement::Emotional {
        audio_duration: duration,
        required_images: images,
        image_display_time: round2(display_time),
        crossfade_duration: CROSSFADE_DURATION,
        fade_in_duration: FADE_IN_DURATION,
        fade_out_duration: FADE_OUT_DURATION,
    }
}

/// One image per detected downbeat
///
/// Falls back to [`time_based`] when the detector found no downbeats.
pub fn beat_synced(duration: f64, downbeats: Vec<f64>) -> AudioRequirement {
    if downbeats.is_empty() {
        return time_based(duration);
    }
    let count = downbeats.len();
    AudioRequirement::BeatSynced {
        audio_duration: duration,
        required_images: count,
        average_beat_interval: duration / count as f64,
        downbeats,
    }
}

/// Fixed-tempo estimate: 120 BPM, a new image every 4 beats
pub fn time_based(duration: f64) -> AudioRequirement {
    let seconds_per_image = (60.0 / FALLBACK_BPM as f64) * BEATS_PER_IMAGE as f64;
    let images = (duration / seconds_per_image).ceil();
    let images = if images.is_finite() && images > 0.0 {
        images as usize
    } else {
        0
    };

    AudioRequirement::TimeBased {
        audio_duration: duration,
        required_images: images,
        seconds_per_image,
        estimated_bpm: FALLBACK_BPM,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
