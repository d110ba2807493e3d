//! Progress event payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status carried by every progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// One progress update for a project
///
/// `progress` is a percentage, `None` for unscored output lines and `-1`
/// for failed or cancelled runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub project_id: String,
    pub message: String,
    pub progress: Option<i32>,
    pub status: ProgressStatus,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(
        project_id: impl Into<String>,
        message: impl Into<String>,
        progress: Option<i32>,
        status: ProgressStatus,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            message: message.into(),
            progress,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn processing(
        project_id: impl Into<String>,
        message: impl Into<String>,
        progress: Option<i32>,
    ) -> Self {
        Self::new(project_id, message, progress, ProgressStatus::Processing)
    }

    pub fn completed(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(project_id, message, Some(100), ProgressStatus::Completed)
    }

    pub fn failed(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(project_id, message, Some(-1), ProgressStatus::Failed)
    }

    pub fn cancelled(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(project_id, message, Some(-1), ProgressStatus::Cancelled)
    }

    /// True for completed, failed and cancelled events
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ProgressStatus::Processing)
    }
}
