// Integration tests for the HTTP transport over the orchestrator.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt; // for .collect().await
use mmu_host::config::Config;
use mmu_host::hardware::sim::{SimAirValve, SimPumpDriver};
use mmu_host::orchestrator::{LinkFactory, Orchestrator};
use mmu_host::printer::{PrinterError, PrinterFile, PrinterLink, PrinterStatus};
use mmu_host::web::api::{AppState, create_router};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`

/// Link stub for transport tests; nothing here should ever reach it.
struct UnreachableLink;

#[async_trait]
impl PrinterLink for UnreachableLink {
    async fn get_status(&self) -> Result<PrinterStatus, PrinterError> {
        Err(PrinterError::Connection { attempts: 3, reason: "unreachable".to_string() })
    }

    async fn pause(&self) -> Result<(), PrinterError> {
        Err(PrinterError::Connection { attempts: 3, reason: "unreachable".to_string() })
    }

    async fn resume(&self) -> Result<(), PrinterError> {
        Err(PrinterError::Connection { attempts: 3, reason: "unreachable".to_string() })
    }

    async fn stop(&self) -> Result<(), PrinterError> {
        Err(PrinterError::Connection { attempts: 3, reason: "unreachable".to_string() })
    }

    async fn list_files(&self) -> Result<Vec<PrinterFile>, PrinterError> {
        Err(PrinterError::Connection { attempts: 3, reason: "unreachable".to_string() })
    }

    async fn start_print(&self, _internal_name: &str) -> Result<(), PrinterError> {
        Err(PrinterError::Connection { attempts: 3, reason: "unreachable".to_string() })
    }
}

fn test_state() -> AppState {
    let factory: LinkFactory = Box::new(|_| Arc::new(UnreachableLink) as Arc<dyn PrinterLink>);
    Arc::new(Orchestrator::new(
        Config::default(),
        Arc::new(SimPumpDriver::new(0.0)),
        Arc::new(SimAirValve::new()),
        factory,
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_status_reports_idle_snapshot() {
    let app = create_router(test_state());
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/status")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["state"], json!("idle"));
    assert_eq!(body["recipe_size"], json!(0));
    assert_eq!(body["recipe_active"], json!(false));
}

#[tokio::test]
async fn test_command_rejected_while_not_running() {
    let app = create_router(test_state());
    let payload = json!({"type": "get_files"});
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/command")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not running"));
}

#[tokio::test]
async fn test_unknown_command_kind_is_rejected() {
    let app = create_router(test_state());
    let payload = json!({"type": "warp_drive"});
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/command")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_stop_without_session_is_conflict() {
    let app = create_router(test_state());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/stop")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
