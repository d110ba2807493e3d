//! Audio duration via ffprobe

use std::path::Path;

use tracing::debug;

use super::tool_invoker::{self, ToolError};
use super::tool_resolver::{Tool, ToolResolver};

/// Duration of `audio` in seconds
pub async fn probe_duration(tools: &ToolResolver, audio: &Path) -> Result<f64, ToolError> {
    let ffprobe = tools
        .resolve(Tool::Ffprobe)
        .await
        .ok_or_else(|| ToolError::Unavailable(Tool::Ffprobe.to_string()))?;

    let cmd = ffprobe.command().args([
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        audio.to_string_lossy().into_owned(),
    ]);
    let output = tool_invoker::run_to_completion(&cmd).await?;

    let duration = parse_duration(&output.stdout).ok_or_else(|| ToolError::InvalidOutput {
        program: cmd.program_name(),
        reason: "no duration reported".to_string(),
        output: output.stdout.clone(),
    })?;
    debug!(audio = %audio.display(), duration, "Probed audio duration");
    Ok(duration)
}

/// First line of ffprobe output that parses as a positive, finite number
pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
}
