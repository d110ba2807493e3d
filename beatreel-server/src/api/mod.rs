//! HTTP API handlers for beatreel-server
//!
//! Every JSON route lives under `/api`; the push channel is `GET /events`.

pub mod analyze;
pub mod health;
pub mod maintenance;
pub mod process;
pub mod projects;
pub mod sse;
pub mod uploads;

pub use analyze::analyze_routes;
pub use health::health_routes;
pub use maintenance::maintenance_routes;
pub use process::process_routes;
pub use projects::project_routes;
pub use sse::event_stream;
pub use uploads::upload_routes;
