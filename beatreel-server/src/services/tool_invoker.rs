//! External tool invocation
//!
//! Every subprocess (ffmpeg, ffprobe, yt-dlp, detector scripts, the
//! slideshow pipeline scripts) runs through here. Output is delivered
//! line by line as it arrives so callers can react to progress markers
//! before the tool exits.
//!
//! Three terminal outcomes are distinguished:
//! - exit code 0
//! - non-zero exit ([`ToolError::Failed`], with captured output)
//! - spawn failure ([`ToolError::Spawn`], binary missing or not executable)

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Number of trailing output lines kept for failure reports
pub const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not be started at all
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and reported failure
    #[error("{program} failed with exit code {}", display_code(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    /// Waiting on the process failed
    #[error("Lost track of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No candidate for the tool could be found
    #[error("{0} is not installed or not runnable")]
    Unavailable(String),

    /// The tool exited 0 but its output could not be understood
    #[error("Unexpected output from {program}: {reason}")]
    InvalidOutput {
        program: String,
        reason: String,
        output: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

impl ToolError {
    /// Captured tool output, when the tool got far enough to produce any
    pub fn output(&self) -> Option<&str> {
        match self {
            ToolError::Failed { output, .. } | ToolError::InvalidOutput { output, .. }
                if !output.is_empty() =>
            {
                Some(output)
            }
            _ => None,
        }
    }
}

/// A command line for an external tool
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of tool output, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Exit of a tool that ran to completion (successfully or not)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ToolExit {
    fn from(status: ExitStatus) -> Self {
        Self { code: status.code() }
    }
}

/// Requests termination of a running tool
///
/// Cloneable so the run registry can hold one while the run task owns the
/// [`RunningTool`].
#[derive(Debug, Clone)]
pub struct KillHandle {
    tx: mpsc::Sender<()>,
}

impl KillHandle {
    /// Ask the tool to terminate. Returns false when it has already exited.
    pub fn terminate(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// A spawned tool whose output is being streamed
pub struct RunningTool {
    program: String,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    exit: oneshot::Receiver<std::io::Result<ExitStatus>>,
    kill: KillHandle,
}

impl RunningTool {
    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Next output line from stdout or stderr; `None` once both are closed
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Wait for the process to exit
    pub async fn wait(self) -> Result<ToolExit, ToolError> {
        let program = self.program;
        match self.exit.await {
            Ok(Ok(status)) => Ok(status.into()),
            Ok(Err(source)) => Err(ToolError::Wait { program, source }),
            Err(_) => Err(ToolError::Wait {
                program,
                source: std::io::Error::new(std::io::ErrorKind::Other, "exit watcher dropped"),
            }),
        }
    }
}

/// Spawn `cmd` with piped output
///
/// On Unix the tool becomes the leader of its own process group so that a
/// termination request also reaches anything it spawned.
pub fn spawn(cmd: &ToolCommand) -> Result<RunningTool, ToolError> {
    let program = cmd.program_name();

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    if let Some(dir) = &cmd.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in &cmd.env {
        command.env(key, value);
    }
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(program = %program, pid = ?child.id(), args = ?cmd.args, "Spawned external tool");

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, OutputStream::Stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, OutputStream::Stderr, line_tx));
    }

    let (kill_tx, kill_rx) = mpsc::channel(1);
    let (exit_tx, exit_rx) = oneshot::channel();
    tokio::spawn(watch_exit(child, kill_rx, exit_tx, program.clone()));

    Ok(RunningTool {
        program,
        lines: line_rx,
        exit: exit_rx,
        kill: KillHandle { tx: kill_tx },
    })
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Tools print locale-encoded filenames; keep draining past bad bytes
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                trace!(?stream, error = %e, "Stopped reading tool output");
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: oneshot::Sender<std::io::Result<ExitStatus>>,
    program: String,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = kill_rx.recv() => {
            debug!(program = %program, "Terminating external tool");
            terminate(&mut child);
            child.wait().await
        }
    };
    let _ = exit_tx.send(status);
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    // Already reaped
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: kill(2) with a negative pid signals the process group
    // created by `process_group(0)` at spawn; no memory is touched.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, "SIGTERM to process group failed, killing process");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Output of a tool that exited 0
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a short-lived tool to completion, capturing all output
///
/// A non-zero exit becomes [`ToolError::Failed`] carrying the last
/// [`OUTPUT_TAIL_LINES`] lines of combined output.
pub async fn run_to_completion(cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
    let mut tool = spawn(cmd)?;
    let mut output = ToolOutput::default();
    let mut tail = OutputTail::default();

    while let Some(line) = tool.next_line().await {
        let buffer = match line.stream {
            OutputStream::Stdout => &mut output.stdout,
            OutputStream::Stderr => &mut output.stderr,
        };
        buffer.push_str(&line.text);
        buffer.push('\n');
        tail.push(line.text);
    }

    let program = tool.program.clone();
    let exit = tool.wait().await?;
    if exit.success() {
        Ok(output)
    } else {
        Err(ToolError::Failed {
            program,
            code: exit.code,
            output: tail.joined(),
        })
    }
}

/// Bounded buffer of the most recent output lines
#[derive(Debug, Default)]
pub struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    pub fn push(&mut self, line: String) {
        if self.lines.len() == OUTPUT_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}
