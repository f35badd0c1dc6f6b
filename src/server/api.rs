//! REST API handlers for the curator server
//!
//! Every operation answers with an [`ApiResponse`] envelope. Failures carry
//! the [`ErrorKind`] so that a replica can rebuild the same error locally.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotator::BackendIdentity;
use crate::error::{Error, ErrorKind, Result};
use crate::metrics;
use crate::models::Record;
use crate::pool::PoolStatus;

use super::app::AppState;

// ============================================================================
// API Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

/// `POST /api/provide`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvideRequest {
    pub view_name: String,
    pub text: String,
    #[serde(default)]
    pub force_update: bool,
}

/// `POST /api/ws-provide`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsProvideRequest {
    pub view_name: String,
    pub sentences: Vec<String>,
    #[serde(default)]
    pub force_update: bool,
}

/// `POST /api/record`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRequest {
    pub text: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub replica: bool,
    pub pools: Vec<PoolStatus>,
}

/// HTTP status for each error class
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InputRejected => StatusCode::BAD_REQUEST,
        ErrorKind::AnnotationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Security => StatusCode::FORBIDDEN,
        ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Annotation endpoints
        .route("/api/provide", post(provide))
        .route("/api/ws-provide", post(ws_provide))
        .route("/api/record", post(get_record).put(store_record))
        .route("/api/record/{identifier}", get(get_record_by_id))
        // Introspection
        .route("/api/annotations", get(describe_annotations))
        .route("/api/identities", get(identities))
        .route("/api/health", get(health_check))
        // Probes
        .route("/api/ping", get(ping))
        .route("/api/name", get(name))
        .route("/api/version", get(version))
        .route("/api/source-identifier", get(source_identifier))
        // Prometheus scrape
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Wrap an operation result in the envelope and record it
fn respond<T: Serialize>(endpoint: &'static str, started: Instant, result: Result<T>) -> Response {
    let (status, body) = match result {
        Ok(data) => (StatusCode::OK, ApiResponse::success(data)),
        Err(e) => {
            let status = status_for(e.kind());
            if status.is_server_error() {
                tracing::warn!(endpoint, status = status.as_u16(), error = %e, "Request failed");
            } else {
                tracing::debug!(endpoint, status = status.as_u16(), error = %e, "Request rejected");
            }
            (status, ApiResponse::failure(&e))
        }
    };
    metrics::record_api_request(endpoint, status.as_u16(), started.elapsed().as_secs_f64());
    (status, Json(body)).into_response()
}

// ============================================================================
// Annotation Handlers
// ============================================================================

async fn provide(
    State(state): State<AppState>,
    Json(request): Json<ProvideRequest>,
) -> Response {
    let started = Instant::now();
    let result = state
        .orchestrator
        .provide(&request.view_name, &request.text, request.force_update)
        .await;
    respond("provide", started, result)
}

async fn ws_provide(
    State(state): State<AppState>,
    Json(request): Json<WsProvideRequest>,
) -> Response {
    let started = Instant::now();
    let result = state
        .orchestrator
        .ws_provide(&request.view_name, &request.sentences, request.force_update)
        .await;
    respond("ws_provide", started, result)
}

async fn get_record(
    State(state): State<AppState>,
    Json(request): Json<RecordRequest>,
) -> Response {
    let started = Instant::now();
    let result = state.orchestrator.get_record(&request.text).await;
    respond("get_record", started, result)
}

async fn get_record_by_id(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Response {
    let started = Instant::now();
    let result = state.orchestrator.get_record_by_id(&identifier).await;
    respond("get_record_by_id", started, result)
}

/// Stores the record and answers with its identifier
async fn store_record(State(state): State<AppState>, Json(record): Json<Record>) -> Response {
    let started = Instant::now();
    let result = state
        .orchestrator
        .store_record(&record)
        .await
        .map(|()| record.identifier);
    respond("store_record", started, result)
}

// ============================================================================
// Introspection Handlers
// ============================================================================

async fn describe_annotations(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let described: BTreeMap<String, String> = state.orchestrator.describe_annotations().await;
    respond("describe_annotations", started, Ok(described))
}

/// Backend identities per view; replicas poll this on their master
async fn identities(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let identities: HashMap<String, BackendIdentity> = state.orchestrator.identities().all().await;
    respond("identities", started, Ok(identities))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        started_at: state.started_at,
        replica: orchestrator.is_replica(),
        pools: orchestrator.pools().iter().map(|p| p.status()).collect(),
    }))
}

// ============================================================================
// Probes
// ============================================================================

async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.ping()))
}

async fn name(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.name()))
}

async fn version(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.version()))
}

async fn source_identifier(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.source_identifier()))
}

async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
