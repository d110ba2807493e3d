//! Unit tests for configuration and graceful degradation
//!
//! Tests cover:
//! - Missing or broken TOML files fall back to defaults without failing
//! - Root folder priority: CLI > environment > TOML > compiled default
//! - Partial TOML files keep defaults for omitted fields
//!
//! Note: Uses serial_test to prevent ENV variable race conditions.

use beatreel_common::config::{
    default_root_folder, resolve_root_folder, resolve_scripts_dir, ServerConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = ServerConfig::default();
    assert_eq!(config.port, 3000);
    assert_eq!(config.bind_address, "0.0.0.0");
    assert_eq!(config.event_capacity, 1000);
    assert!(config.root_folder.is_none());
    assert!(!config.cleanup_on_start);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = ServerConfig::from_toml_str("port = 8080\nscripts_dir = \"/opt/beatreel/scripts\"\n")
        .expect("partial config should parse");

    assert_eq!(config.port, 8080);
    assert_eq!(config.scripts_dir, Some(PathBuf::from("/opt/beatreel/scripts")));
    assert_eq!(config.bind_address, "0.0.0.0");
    assert_eq!(config.event_capacity, 1000);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = ServerConfig::from_toml_str("port = \"not a number\"");
    assert!(matches!(result, Err(beatreel_common::Error::Config(_))));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let config = ServerConfig::load(Some(Path::new("/nonexistent/beatreel/config.toml")));
    assert_eq!(config, ServerConfig::default());
}

#[test]
fn test_load_broken_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    let config = ServerConfig::load(Some(&path));
    assert_eq!(config, ServerConfig::default());
}

#[test]
fn test_load_valid_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "root_folder = \"/srv/reels\"\ncleanup_on_start = true\n").unwrap();

    let config = ServerConfig::load(Some(&path));
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/reels")));
    assert!(config.cleanup_on_start);
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/beatreel-env");
    let config = ServerConfig {
        root_folder: Some(PathBuf::from("/tmp/beatreel-toml")),
        ..ServerConfig::default()
    };

    let root = resolve_root_folder(Some(Path::new("/tmp/beatreel-cli")), &config);
    assert_eq!(root, PathBuf::from("/tmp/beatreel-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/beatreel-env");
    let config = ServerConfig {
        root_folder: Some(PathBuf::from("/tmp/beatreel-toml")),
        ..ServerConfig::default()
    };

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/beatreel-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let config = ServerConfig {
        root_folder: Some(PathBuf::from("/tmp/beatreel-toml")),
        ..ServerConfig::default()
    };

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/beatreel-toml"));
}

#[test]
#[serial]
fn test_compiled_default_when_nothing_set() {
    env::remove_var(ROOT_FOLDER_ENV);
    let root = resolve_root_folder(None, &ServerConfig::default());
    assert_eq!(root, default_root_folder());
    assert!(root.ends_with("projects"));
}

#[test]
fn test_scripts_dir_defaults_next_to_root() {
    let config = ServerConfig::default();
    assert_eq!(
        resolve_scripts_dir(Path::new("/srv/beatreel/projects"), &config),
        PathBuf::from("/srv/beatreel/scripts")
    );

    let configured = ServerConfig {
        scripts_dir: Some(PathBuf::from("/opt/scripts")),
        ..ServerConfig::default()
    };
    assert_eq!(
        resolve_scripts_dir(Path::new("/srv/beatreel/projects"), &configured),
        PathBuf::from("/opt/scripts")
    );
}
