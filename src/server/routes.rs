use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use crate::server::AppState;
use crate::types::{
    ErrorStatusPolicy, ExtractResponse, Extraction, ExtractionRequest, ResponsePolicy,
    SnifferError,
};

pub const SERVICE_NAME: &str = "manifest-sniffer";

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: i64,
    active_sessions: usize,
}

pub async fn liveness_handler() -> &'static str {
    "Manifest sniffer running"
}

/// Health check endpoint
///
/// Always 200 while the process serves requests; reports live browser sessions.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        service: SERVICE_NAME,
        timestamp: chrono::Utc::now().timestamp(),
        active_sessions: state.sniffer.active_sessions(),
    })
}

/// `GET /extract?url=<page>`
pub async fn extract_query_handler(
    State(state): State<AppState>,
    query: Result<Query<ExtractionRequest>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(request)) => run_extraction(state, request.url).await,
        Err(rejection) => {
            debug!("Rejected extraction query: {}", rejection);
            reject(
                format!("Invalid query string: {}", rejection.body_text()),
                state.policy,
            )
        }
    }
}

/// `POST /extract` with `{ "url": "<page>" }`
pub async fn extract_json_handler(
    State(state): State<AppState>,
    body: Result<Json<ExtractionRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => run_extraction(state, request.url).await,
        Err(rejection) => {
            debug!("Rejected extraction body: {}", rejection);
            reject(
                format!("Invalid request body: {}", rejection.body_text()),
                state.policy,
            )
        }
    }
}

fn reject(message: String, policy: ResponsePolicy) -> Response {
    render(Extraction::Failed(SnifferError::Validation(message)), policy)
}

async fn run_extraction(state: AppState, url: Option<String>) -> Response {
    // Detached so a client hanging up cannot abort a session halfway through teardown
    let sniffer = state.sniffer.clone();
    let task = tokio::spawn(async move { sniffer.extract(url.as_deref()).await });

    let extraction = match task.await {
        Ok(extraction) => extraction,
        Err(e) => Extraction::Failed(SnifferError::Runtime(format!(
            "Extraction task failed: {}",
            e
        ))),
    };
    render(extraction, state.policy)
}

/// Map an extraction onto status code and JSON body.
pub fn render(extraction: Extraction, policy: ResponsePolicy) -> Response {
    let status = match (&extraction, policy.error_status) {
        (Extraction::Failed(_), ErrorStatusPolicy::AlwaysOk) => StatusCode::OK,
        (Extraction::Failed(e), ErrorStatusPolicy::StatusCode) if e.is_validation() => {
            StatusCode::BAD_REQUEST
        }
        (Extraction::Failed(_), ErrorStatusPolicy::StatusCode) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    let body = ExtractResponse::from_extraction(&extraction, policy.empty_result);
    (status, Json(body)).into_response()
}
