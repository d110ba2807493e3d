//! Server-Sent Events push channel
//!
//! Every progress event for every project goes to every client; clients
//! filter by `projectId`.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;

use crate::AppState;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    beatreel_common::sse::event_bus_stream(&state.event_bus, "beatreel-server")
}
