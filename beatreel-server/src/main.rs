//! beatreel-server - Slideshow generation service
//!
//! Serves the project API, runs the pipeline scripts and streams progress
//! to browsers over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use beatreel_common::config::{self, ServerConfig};
use beatreel_common::events::EventBus;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beatreel_server::services::cleanup::cleanup_all;
use beatreel_server::AppState;

/// Command-line arguments for beatreel-server
#[derive(Parser, Debug)]
#[command(name = "beatreel-server")]
#[command(about = "Slideshow generation service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "BEATREEL_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config file)
    #[arg(short, long, env = "BEATREEL_BIND")]
    bind: Option<String>,

    /// Folder holding one directory per project
    #[arg(short, long, env = config::ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    /// Folder holding the pipeline and detector scripts
    #[arg(short, long, env = "BEATREEL_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    /// Explicit TOML config file
    #[arg(short, long, env = config::CONFIG_FILE_ENV)]
    config: Option<PathBuf>,

    /// Remove orphaned pre-rendered clips before serving
    #[arg(long)]
    cleanup_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beatreel_server=info,beatreel_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut settings = ServerConfig::load(args.config.as_deref());
    if let Some(dir) = args.scripts_dir.clone() {
        settings.scripts_dir = Some(dir);
    }

    info!("Starting beatreel-server");
    info!(
        "Version: {} ({}, {} build {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    // Explicit --root-folder wins; clap already folded in the env var
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &settings);
    let scripts_dir = config::resolve_scripts_dir(&root_folder, &settings);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());
    info!("Scripts: {}", scripts_dir.display());
    if !scripts_dir.is_dir() {
        warn!("Scripts folder {} does not exist; runs will fail", scripts_dir.display());
    }

    if args.cleanup_on_start || settings.cleanup_on_start {
        match cleanup_all(&root_folder, |_| false).await {
            Ok(report) => info!(
                "Startup cleanup removed {} orphaned clips from {} projects",
                report.files_deleted, report.projects_scanned
            ),
            Err(e) => warn!("Startup cleanup failed: {}", e),
        }
    }

    let event_bus = EventBus::new(settings.event_capacity);
    let state = AppState::new(root_folder, scripts_dir, event_bus);
    let app = beatreel_server::build_router(state);

    let bind = args.bind.unwrap_or(settings.bind_address);
    let port = args.port.unwrap_or(settings.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
