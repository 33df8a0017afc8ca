//! Defines the Axum API routes and handlers.
//!
//! The router is a thin transport over the orchestrator's queue-in /
//! events-out surface; no handler touches hardware directly.

use crate::commands::CommandRequest;
use crate::orchestrator::{Orchestrator, OrchestratorError, StateSnapshot};
use crate::web::models::{CommandAccepted, ErrorResponse, StartRequest};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on an event long-poll before answering 204.
const EVENT_POLL_WAIT: Duration = Duration::from_secs(25);

pub type AppState = Arc<Orchestrator>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(orchestrator: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/command", post(submit_command))
        .route("/api/v1/events", get(next_event))
        .route("/api/v1/start", post(start_monitoring))
        .route("/api/v1/stop", post(stop_monitoring))
        .with_state(orchestrator)
}

fn reject(error: &OrchestratorError) -> Response {
    let code = match error {
        OrchestratorError::NotIdle(_) => StatusCode::CONFLICT,
        OrchestratorError::Recipe(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::NotRunning => StatusCode::CONFLICT,
        OrchestratorError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::StopTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Halted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(ErrorResponse { error: error.to_string() })).into_response()
}

/// Handler returning the current state snapshot.
async fn get_status(State(orchestrator): State<AppState>) -> Json<StateSnapshot> {
    Json(orchestrator.snapshot().await)
}

/// Handler enqueuing a command for the monitor loop. Unknown command kinds
/// are rejected by deserialization before this handler runs.
async fn submit_command(
    State(orchestrator): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Response {
    match orchestrator
        .submit_command(request.kind, request.parameters)
        .await
    {
        Ok(command_id) => {
            (StatusCode::ACCEPTED, Json(CommandAccepted { command_id })).into_response()
        }
        Err(e) => reject(&e),
    }
}

/// Long-poll handler for the next status event; 204 when nothing arrives
/// within the poll window.
async fn next_event(State(orchestrator): State<AppState>) -> Response {
    match orchestrator.next_event(EVENT_POLL_WAIT).await {
        Some(event) => Json(event).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Handler launching the monitor loop.
async fn start_monitoring(
    State(orchestrator): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Response {
    let snapshot = orchestrator.snapshot().await;
    let printer_ip = request.printer_ip.unwrap_or(snapshot.printer_ip);
    let result = orchestrator
        .start(&printer_ip, request.recipe_path.as_deref().map(Path::new))
        .await;
    match result {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => reject(&e),
    }
}

/// Handler stopping the monitor loop.
async fn stop_monitoring(State(orchestrator): State<AppState>) -> Response {
    match orchestrator.stop().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => reject(&e),
    }
}
