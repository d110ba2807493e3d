//! External tool resolution
//!
//! Each logical tool has an ordered list of candidates. The first candidate
//! whose probe succeeds wins and the answer is cached for the life of the
//! process, so probing happens at most once per tool.
//!
//! Resolution order per tool:
//! 1. Environment override (`BEATREEL_FFMPEG_PATH`, `BEATREEL_YT_DLP_PATH`, ...)
//! 2. Built-in candidates, in order
//!
//! A tool with no working candidate resolves to `None`; callers decide
//! whether that is fatal (ffprobe during analysis) or has a fallback
//! (beat detector, HEIC conversion).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::tool_invoker::{self, ToolCommand};

/// Tools the service shells out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
    YtDlp,
    /// HEIC/HEIF to JPEG converter, invoked as `<program> <input> <output>`
    HeicConverter,
    /// Downbeat detector, invoked as `<program> [script] <audio> <out.json>`
    BeatDetector,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Ffmpeg,
        Tool::Ffprobe,
        Tool::YtDlp,
        Tool::HeicConverter,
        Tool::BeatDetector,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
            Tool::YtDlp => "yt-dlp",
            Tool::HeicConverter => "heic-converter",
            Tool::BeatDetector => "beat-detector",
        }
    }

    /// Environment variable holding an explicit path for this tool
    pub fn env_key(&self) -> String {
        let upper = self.name().to_ascii_uppercase().replace('-', "_");
        format!("BEATREEL_{}_PATH", upper)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One way of providing a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCandidate {
    pub program: PathBuf,
    /// Arguments placed before the caller's arguments (e.g. a script path)
    pub prefix_args: Vec<String>,
    pub probe_args: Vec<String>,
    /// When false, a probe that starts the program counts as success even
    /// if it exits non-zero (tools without a version flag)
    pub require_success: bool,
    /// Files that must exist for this candidate to be usable
    pub required_files: Vec<PathBuf>,
}

impl ToolCandidate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            probe_args: Vec::new(),
            require_success: true,
            required_files: Vec::new(),
        }
    }

    pub fn prefix(mut self, args: &[&str]) -> Self {
        self.prefix_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn probe(mut self, args: &[&str]) -> Self {
        self.probe_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn lenient(mut self) -> Self {
        self.require_success = false;
        self
    }

    pub fn requires(mut self, path: impl Into<PathBuf>) -> Self {
        self.required_files.push(path.into());
        self
    }

    async fn is_usable(&self) -> bool {
        if let Some(missing) = self.required_files.iter().find(|p| !p.exists()) {
            debug!(program = %self.program.display(), missing = %missing.display(), "Candidate missing required file");
            return false;
        }

        let probe = ToolCommand::new(&self.program).args(self.probe_args.iter().cloned());
        match tool_invoker::run_to_completion(&probe).await {
            Ok(_) => true,
            Err(tool_invoker::ToolError::Failed { .. }) => !self.require_success,
            Err(e) => {
                debug!(program = %self.program.display(), error = %e, "Candidate probe failed");
                false
            }
        }
    }
}

/// A tool that passed its probe
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    pub tool: Tool,
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl ResolvedTool {
    /// Command for this tool with its prefix arguments already applied
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).args(self.prefix_args.iter().cloned())
    }
}

/// Resolves and caches tool locations
pub struct ToolResolver {
    candidates: HashMap<Tool, Vec<ToolCandidate>>,
    resolved: HashMap<Tool, OnceCell<Option<ResolvedTool>>>,
}

impl ToolResolver {
    /// Default candidates; detector scripts are looked up in `scripts_dir`
    pub fn new(scripts_dir: &Path) -> Self {
        let mut resolver = Self::empty();
        for tool in Tool::ALL {
            resolver
                .candidates
                .insert(tool, default_candidates(tool, scripts_dir));
        }
        resolver
    }

    /// Resolver with no candidates at all; every tool is unavailable
    pub fn empty() -> Self {
        Self {
            candidates: HashMap::new(),
            resolved: Tool::ALL.iter().map(|t| (*t, OnceCell::new())).collect(),
        }
    }

    /// Replace the candidate list for one tool
    pub fn with_candidates(mut self, tool: Tool, candidates: Vec<ToolCandidate>) -> Self {
        self.candidates.insert(tool, candidates);
        self
    }

    /// First working candidate for `tool`, probing on first use only
    pub async fn resolve(&self, tool: Tool) -> Option<ResolvedTool> {
        let cell = self.resolved.get(&tool)?;
        cell.get_or_init(|| self.probe(tool)).await.clone()
    }

    pub async fn is_available(&self, tool: Tool) -> bool {
        self.resolve(tool).await.is_some()
    }

    async fn probe(&self, tool: Tool) -> Option<ResolvedTool> {
        if let Some(found) = env_override(tool) {
            info!(tool = %tool, program = %found.program.display(), "Using tool from environment override");
            return Some(found);
        }

        let candidates = self.candidates.get(&tool).map(Vec::as_slice).unwrap_or(&[]);
        for candidate in candidates {
            if candidate.is_usable().await {
                info!(tool = %tool, program = %candidate.program.display(), "Resolved external tool");
                return Some(ResolvedTool {
                    tool,
                    program: candidate.program.clone(),
                    prefix_args: candidate.prefix_args.clone(),
                });
            }
        }

        warn!(tool = %tool, "External tool not available");
        None
    }
}

fn env_override(tool: Tool) -> Option<ResolvedTool> {
    override_from(tool, |key| std::env::var(key).ok())
}

fn override_from<F>(tool: Tool, lookup: F) -> Option<ResolvedTool>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(&tool.env_key())?;
    let program = PathBuf::from(value.trim());
    if program.as_os_str().is_empty() || !program.exists() {
        return None;
    }
    Some(ResolvedTool {
        tool,
        program,
        prefix_args: Vec::new(),
    })
}

/// Interpreters tried for the Python detector scripts, in order
const PYTHON_INTERPRETERS: [&str; 2] = ["python3", "python"];

fn default_candidates(tool: Tool, scripts_dir: &Path) -> Vec<ToolCandidate> {
    match tool {
        Tool::Ffmpeg => vec![ToolCandidate::new("ffmpeg").probe(&["-version"])],
        Tool::Ffprobe => vec![ToolCandidate::new("ffprobe").probe(&["-version"])],
        Tool::YtDlp => vec![ToolCandidate::new("yt-dlp").probe(&["--version"])],
        Tool::HeicConverter => vec![
            // heif-convert has no version flag and exits 1 on usage
            ToolCandidate::new("heif-convert").lenient(),
            ToolCandidate::new("magick").probe(&["-version"]),
            ToolCandidate::new("convert").probe(&["-version"]),
        ],
        Tool::BeatDetector => {
            let madmom = scripts_dir.join("madmom_processor.py");
            let simple = scripts_dir.join("simple_beat_detector.py");
            let madmom_arg = madmom.to_string_lossy().into_owned();
            let simple_arg = simple.to_string_lossy().into_owned();
            let mut candidates = Vec::new();
            for python in PYTHON_INTERPRETERS {
                candidates.push(
                    ToolCandidate::new(python)
                        .prefix(&[madmom_arg.as_str()])
                        .probe(&["-c", "import madmom"])
                        .requires(&madmom),
                );
            }
            for python in PYTHON_INTERPRETERS {
                candidates.push(
                    ToolCandidate::new(python)
                        .prefix(&[simple_arg.as_str()])
                        .probe(&["--version"])
                        .requires(&simple),
                );
            }
            candidates
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_env_keys() {
        assert_eq!(Tool::Ffmpeg.env_key(), "BEATREEL_FFMPEG_PATH");
        assert_eq!(Tool::YtDlp.env_key(), "BEATREEL_YT_DLP_PATH");
        assert_eq!(Tool::BeatDetector.env_key(), "BEATREEL_BEAT_DETECTOR_PATH");
    }

    #[tokio::test]
    #[serial]
    async fn test_first_working_candidate_wins() {
        let resolver = ToolResolver::empty().with_candidates(
            Tool::Ffprobe,
            vec![
                ToolCandidate::new("/nonexistent/ffprobe"),
                ToolCandidate::new("/bin/sh").probe(&["-c", "exit 1"]),
                ToolCandidate::new("/bin/sh").prefix(&["-c"]).probe(&["-c", "exit 0"]),
            ],
        );

        let resolved = resolver.resolve(Tool::Ffprobe).await.expect("should resolve");
        assert_eq!(resolved.program, PathBuf::from("/bin/sh"));
        assert_eq!(resolved.prefix_args, vec!["-c".to_string()]);
    }

    #[tokio::test]
    #[serial]
    async fn test_lenient_candidate_accepts_nonzero_probe() {
        let resolver = ToolResolver::empty().with_candidates(
            Tool::HeicConverter,
            vec![ToolCandidate::new("/bin/sh").probe(&["-c", "exit 1"]).lenient()],
        );
        assert!(resolver.is_available(Tool::HeicConverter).await);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_required_file_skips_candidate() {
        let resolver = ToolResolver::empty().with_candidates(
            Tool::BeatDetector,
            vec![ToolCandidate::new("/bin/sh")
                .probe(&["-c", "exit 0"])
                .requires("/nonexistent/madmom_processor.py")],
        );
        assert!(resolver.resolve(Tool::BeatDetector).await.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_resolution_is_cached() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("probed");
        let script = format!("echo x >> {}", marker.display());

        let resolver = ToolResolver::empty().with_candidates(
            Tool::YtDlp,
            vec![ToolCandidate::new("/bin/sh").probe(&["-c", script.as_str()])],
        );

        assert!(resolver.is_available(Tool::YtDlp).await);
        assert!(resolver.is_available(Tool::YtDlp).await);
        let probes = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(probes.lines().count(), 1);
    }

    #[test]
    fn test_override_lookup() {
        let found = override_from(Tool::Ffmpeg, |key| {
            (key == "BEATREEL_FFMPEG_PATH").then(|| "/bin/sh".to_string())
        })
        .expect("override should resolve");
        assert_eq!(found.program, PathBuf::from("/bin/sh"));
        assert!(found.prefix_args.is_empty());

        assert!(override_from(Tool::Ffmpeg, |_| None).is_none());
        assert!(override_from(Tool::Ffmpeg, |_| Some("  ".to_string())).is_none());
        assert!(override_from(Tool::Ffmpeg, |_| Some("/nonexistent/ffmpeg".to_string())).is_none());
    }

    #[test]
    fn test_detector_candidates_try_each_interpreter() {
        let candidates = default_candidates(Tool::BeatDetector, Path::new("/opt/reel"));
        let programs: Vec<_> = candidates.iter().map(|c| c.program.clone()).collect();
        assert_eq!(
            programs,
            ["python3", "python", "python3", "python"].map(PathBuf::from).to_vec()
        );
        assert_eq!(candidates[0].prefix_args, vec!["/opt/reel/madmom_processor.py".to_string()]);
        assert_eq!(candidates[3].prefix_args, vec!["/opt/reel/simple_beat_detector.py".to_string()]);
    }
}
