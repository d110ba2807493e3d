//! Business logic behind the HTTP handlers

pub mod analysis;
pub mod audio_probe;
pub mod beat_detector;
pub mod cleanup;
pub mod estimator;
pub mod orchestrator;
pub mod registry;
pub mod slots;
pub mod stream_download;
pub mod tool_invoker;
pub mod tool_resolver;
pub mod uploads;

pub use orchestrator::Orchestrator;
pub use registry::ProjectRegistry;
pub use tool_resolver::ToolResolver;
