//! beatreel-server library interface
//!
//! Exposes the router and state for integration testing.

pub mod api;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use beatreel_common::events::EventBus;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::services::orchestrator::RunRegistry;
use crate::services::{Orchestrator, ProjectRegistry, ToolResolver};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: ProjectRegistry,
    pub orchestrator: Orchestrator,
    /// Progress events for SSE broadcasting
    pub event_bus: EventBus,
    pub tools: Arc<ToolResolver>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(root_folder: PathBuf, scripts_dir: PathBuf, event_bus: EventBus) -> Self {
        let tools = ToolResolver::new(&scripts_dir);
        Self::with_tools(root_folder, scripts_dir, event_bus, tools)
    }

    /// State with an explicit tool resolver (tests substitute stand-in tools)
    pub fn with_tools(
        root_folder: PathBuf,
        scripts_dir: PathBuf,
        event_bus: EventBus,
        tools: ToolResolver,
    ) -> Self {
        let registry = ProjectRegistry::new(root_folder);
        let orchestrator = Orchestrator::new(
            registry.clone(),
            Arc::new(RunRegistry::new()),
            event_bus.clone(),
            scripts_dir,
        );
        Self {
            registry,
            orchestrator,
            event_bus,
            tools: Arc::new(tools),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let files = ServeDir::new(state.registry.root());

    Router::new()
        .merge(api::project_routes())
        .merge(api::upload_routes())
        .merge(api::process_routes())
        .merge(api::analyze_routes())
        .merge(api::maintenance_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .nest_service("/api/files", files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
