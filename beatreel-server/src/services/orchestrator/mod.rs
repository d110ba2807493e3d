//! Pipeline orchestrator
//!
//! Drives one slideshow pipeline run per project:
//!
//! ```text
//! Idle -> Starting -> Running -> {Completed, Failed, Cancelled} -> Idle
//! ```
//!
//! `start` validates the project and reserves the run slot synchronously,
//! so every caller mistake (missing project, missing assets, run already
//! active) is reported before any process exists. Everything after the
//! reservation happens in a background task and is reported only through
//! the [`EventBus`].

mod progress;
mod run_registry;
mod stages;

pub use progress::{KeywordClassifier, ProgressClassifier};
pub use run_registry::{CancelledRun, RunRegistry, RunTicket};
pub use stages::{select_plan, StageChain, StagePlan};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use beatreel_common::atomic_file;
use beatreel_common::events::{EventBus, ProgressEvent};
use beatreel_common::timecode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{AudioMode, ProjectVariant, SlotBoard};
use crate::services::registry::{
    has_audio_source, has_extension, list_files, ProjectRegistry, IMAGE_EXTENSIONS,
};
use crate::services::tool_invoker::{self, OutputStream, OutputTail, ToolCommand};

/// Interpreter used for pipeline scripts
pub const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NoActiveRun(String),

    #[error("{0}")]
    AlreadyRunning(String),

    #[error("{0}")]
    MissingAssets(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    ScriptMissing(String),

    #[error(transparent)]
    Record(beatreel_common::Error),
}

impl From<beatreel_common::Error> for OrchestratorError {
    fn from(err: beatreel_common::Error) -> Self {
        match err {
            beatreel_common::Error::NotFound(msg) => OrchestratorError::NotFound(msg),
            beatreel_common::Error::InvalidInput(msg) => OrchestratorError::InvalidInput(msg),
            other => OrchestratorError::Record(other),
        }
    }
}

/// Per-request overrides of the persisted settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub audio_offset: Option<String>,
    #[serde(alias = "audioType")]
    pub audio_mode: Option<AudioMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

impl RunState {
    /// Wire label used by the status endpoint
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "processing",
        }
    }
}

/// Accepted run, as reported back to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub project_id: String,
    pub script: &'static str,
    pub fast_path: bool,
    pub audio_offset: String,
    pub audio_type: AudioMode,
}

/// Everything the background task needs to drive a run
struct RunJob {
    ticket: RunTicket,
    plan: StagePlan,
    dir: PathBuf,
    audio_offset: String,
    audio_mode: AudioMode,
    variant: ProjectVariant,
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: ProjectRegistry,
    runs: Arc<RunRegistry>,
    events: EventBus,
    classifier: Arc<dyn ProgressClassifier>,
    scripts_dir: PathBuf,
    shell: PathBuf,
}

impl Orchestrator {
    pub fn new(
        registry: ProjectRegistry,
        runs: Arc<RunRegistry>,
        events: EventBus,
        scripts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            runs,
            events,
            classifier: Arc::new(KeywordClassifier::default()),
            scripts_dir: scripts_dir.into(),
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ProgressClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Validate, reserve the run slot and launch the pipeline in the
    /// background
    pub async fn start(
        &self,
        project_id: &str,
        options: StartOptions,
    ) -> Result<StartedRun, OrchestratorError> {
        let dir = self.registry.existing_dir(project_id).await?;

        let files = list_files(&dir).await?;
        let images: Vec<String> = files
            .iter()
            .filter(|f| has_extension(f, IMAGE_EXTENSIONS))
            .cloned()
            .collect();
        if images.is_empty() {
            return Err(OrchestratorError::MissingAssets(
                "No images found in project".to_string(),
            ));
        }
        if !has_audio_source(&files) {
            return Err(OrchestratorError::MissingAssets(
                "No audio file or YouTube URL found".to_string(),
            ));
        }

        let record = self.registry.load_record(project_id).await?;
        let audio_offset = match options.audio_offset.as_deref().map(str::trim) {
            Some(offset) if !offset.is_empty() => timecode::normalize_offset(offset)?,
            _ => record.audio_offset.clone(),
        };
        let audio_mode = options.audio_mode.unwrap_or(record.audio_mode);

        let slots = if record.variant == ProjectVariant::ScavengerHunt {
            let path = self.registry.slots_path(project_id)?;
            let board = atomic_file::read_json::<SlotBoard>(&path).await?;
            Some(board.unwrap_or_default().normalized())
        } else {
            None
        };

        let mut plan = select_plan(&dir, &record, audio_mode, &images, slots.as_ref()).await;
        if plan.chain.is_fast_path() && !self.script_path(plan.chain).exists() {
            warn!(
                project_id = %project_id,
                script = plan.chain.script_name(),
                "Assemble-only script missing, using full pipeline"
            );
            plan = plan.fall_back();
        }
        if !self.script_path(plan.chain).exists() {
            return Err(OrchestratorError::ScriptMissing(format!(
                "Script {} not found",
                plan.chain.script_name()
            )));
        }

        let ticket = self.runs.try_reserve(project_id).ok_or_else(|| {
            OrchestratorError::AlreadyRunning("Process already running for this project".to_string())
        })?;

        info!(
            project_id = %project_id,
            script = plan.chain.script_name(),
            fast_path = plan.chain.is_fast_path(),
            audio_type = audio_mode.as_str(),
            audio_offset = %audio_offset,
            "Starting slideshow pipeline"
        );

        let started = StartedRun {
            project_id: project_id.to_string(),
            script: plan.chain.script_name(),
            fast_path: plan.chain.is_fast_path(),
            audio_offset: audio_offset.clone(),
            audio_type: audio_mode,
        };

        let job = RunJob {
            ticket,
            plan,
            dir,
            audio_offset,
            audio_mode,
            variant: record.variant,
        };
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.drive(job).await;
        });

        Ok(started)
    }

    /// Terminate the active run for `project_id`
    ///
    /// The slot is freed immediately, without waiting for the process to
    /// exit; the run task notices and stays silent.
    pub fn cancel(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let cancelled = self.runs.cancel(project_id).ok_or_else(|| {
            OrchestratorError::NoActiveRun("No active process found for this project".to_string())
        })?;

        match &cancelled.kill {
            Some(kill) => {
                if !kill.terminate() {
                    debug!(project_id = %project_id, "Pipeline already exiting");
                }
            }
            None => debug!(project_id = %project_id, "Cancelled before spawn"),
        }

        info!(project_id = %project_id, generation = cancelled.generation, "Pipeline cancelled");
        self.events
            .publish(ProgressEvent::cancelled(project_id, "Process cancelled by user"));
        Ok(())
    }

    pub fn status(&self, project_id: &str) -> RunState {
        if self.runs.is_running(project_id) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    fn script_path(&self, chain: StageChain) -> PathBuf {
        self.scripts_dir.join(chain.script_name())
    }

    async fn drive(&self, job: RunJob) {
        let RunJob {
            ticket,
            mut plan,
            dir,
            audio_offset,
            audio_mode,
            variant,
        } = job;
        let project_id = ticket.project_id.clone();

        self.events.publish(ProgressEvent::processing(
            &project_id,
            "Starting slideshow processing...",
            Some(0),
        ));

        if let Err(missing) = plan.verify().await {
            warn!(
                project_id = %project_id,
                missing = %missing.display(),
                "Pre-rendered clip vanished, falling back to full pipeline"
            );
            plan = plan.fall_back();
        }

        let cmd = ToolCommand::new(&self.shell)
            .arg(self.script_path(plan.chain).to_string_lossy())
            .current_dir(&dir)
            .env("AUDIO_OFFSET", &audio_offset)
            .env("PROJECT_DIR", dir.to_string_lossy())
            .env("AUDIO_TYPE", audio_mode.as_str())
            .env("PROJECT_TYPE", variant.as_str());

        if !self.runs.owns(&ticket) {
            debug!(project_id = %project_id, "Run cancelled before spawn");
            return;
        }

        let mut tool = match tool_invoker::spawn(&cmd) {
            Ok(tool) => tool,
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Failed to start pipeline");
                if self.runs.release(&ticket) {
                    self.events
                        .publish(ProgressEvent::failed(&project_id, format!("Process error: {}", e)));
                }
                return;
            }
        };

        if !self.runs.attach(&ticket, tool.kill_handle()) {
            tool.kill_handle().terminate();
            let _ = tool.wait().await;
            debug!(project_id = %project_id, "Run cancelled during spawn");
            return;
        }

        let mut tail = OutputTail::default();
        while let Some(line) = tool.next_line().await {
            tail.push(line.text.clone());
            if !self.runs.owns(&ticket) {
                continue;
            }
            let text = line.text.trim();
            if text.is_empty() {
                continue;
            }
            let event = match line.stream {
                OutputStream::Stdout => {
                    ProgressEvent::processing(&project_id, text, self.classifier.classify(text))
                }
                OutputStream::Stderr => {
                    ProgressEvent::processing(&project_id, format!("Error: {}", text), None)
                }
            };
            self.events.publish(event);
        }

        let exit = tool.wait().await;
        // Stamp before releasing so an idle status already shows the new run
        if matches!(&exit, Ok(e) if e.success()) && self.runs.owns(&ticket) {
            if let Err(e) = self.registry.mark_processed(&project_id).await {
                error!(project_id = %project_id, error = %e, "Failed to record completed run");
            }
        }
        if !self.runs.release(&ticket) {
            debug!(project_id = %project_id, "Cancelled pipeline exited");
            return;
        }

        match exit {
            Ok(exit) if exit.success() => {
                info!(project_id = %project_id, "Slideshow pipeline completed");
                self.events.publish(ProgressEvent::completed(
                    &project_id,
                    "Slideshow processing completed!",
                ));
            }
            Ok(exit) => {
                let code = exit
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                warn!(project_id = %project_id, code = %code, "Slideshow pipeline failed");
                let output = tail.joined();
                let message = if output.is_empty() {
                    format!("Process failed with code {}", code)
                } else {
                    format!("Process failed with code {}\n{}", code, output)
                };
                self.events.publish(ProgressEvent::failed(&project_id, message));
            }
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Lost pipeline process");
                self.events
                    .publish(ProgressEvent::failed(&project_id, format!("Process error: {}", e)));
            }
        }
    }
}
