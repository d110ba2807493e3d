//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the projects root folder
pub const ROOT_FOLDER_ENV: &str = "BEATREEL_ROOT_FOLDER";

/// Environment variable pointing at an explicit config file
pub const CONFIG_FILE_ENV: &str = "BEATREEL_CONFIG";

/// Server configuration as read from TOML
///
/// Every field has a default, so a partial (or missing) file still yields
/// a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Folder holding one sub-directory per project
    pub root_folder: Option<PathBuf>,
    pub bind_address: String,
    pub port: u16,
    /// Folder holding the pipeline shell scripts and detector scripts
    pub scripts_dir: Option<PathBuf>,
    /// Per-subscriber buffer of the progress EventBus
    pub event_capacity: usize,
    /// Delete orphaned per-image temp videos at startup
    pub cleanup_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            scripts_dir: None,
            event_capacity: 1000,
            cleanup_on_start: false,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration, degrading gracefully
    ///
    /// Search order: explicit path, `BEATREEL_CONFIG`, platform config file.
    /// A missing or unparsable file logs a warning and yields defaults;
    /// configuration problems never stop startup.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var(CONFIG_FILE_ENV)
                .ok()
                .map(PathBuf::from)
                .or_else(|| locate_config_file().ok()),
        };

        let Some(path) = path else {
            info!("No config file found, using compiled defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring invalid config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable (`BEATREEL_ROOT_FOLDER`)
/// 3. `root_folder` from the TOML config
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &ServerConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Scripts folder: configured value, else `<root>/../scripts`
pub fn resolve_scripts_dir(root_folder: &Path, config: &ServerConfig) -> PathBuf {
    config.scripts_dir.clone().unwrap_or_else(|| {
        root_folder
            .parent()
            .map(|p| p.join("scripts"))
            .unwrap_or_else(|| PathBuf::from("scripts"))
    })
}

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("beatreel").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/beatreel/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/beatreel/projects (or /var/lib/beatreel/projects)
        dirs::data_local_dir()
            .map(|d| d.join("beatreel").join("projects"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/beatreel/projects"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("beatreel").join("projects"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/beatreel/projects"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("beatreel").join("projects"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\beatreel\\projects"))
    } else {
        PathBuf::from("./projects")
    }
}
