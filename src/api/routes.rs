//! API route definitions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::engine::{EngineError, Submission};
use crate::logs::LogLevel;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/run-test", post(run_test))
        .route("/tests", get(list_tests))
        .route("/test-status/{test_id}", get(test_status))
        .route("/test-results/{test_id}", get(test_results))
        .route("/test-logs/{test_id}", get(test_logs).delete(clear_logs))
        .route("/test-logs/{test_id}/export", get(export_logs))
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn run_test(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let submission = match Submission::from_json(&body) {
        Ok(submission) => submission,
        Err(e) => return bad_request(e.to_string()),
    };

    match state
        .engine
        .submit_and_dispatch(&submission.name, submission.steps)
        .await
    {
        Ok(test_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "testId": test_id, "status": "queued" })),
        )
            .into_response(),
        Err(e @ EngineError::InvalidRequest(_)) => bad_request(e.to_string()),
        Err(e) => {
            error!(error = %e, "failed to create run");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

async fn list_tests(State(state): State<AppState>) -> Json<Value> {
    let tests = state.engine.list_runs().await;
    Json(json!({ "tests": tests }))
}

async fn test_status(State(state): State<AppState>, Path(test_id): Path<String>) -> Json<Value> {
    let status = state.engine.status(&test_id).await;
    let logs = state.engine.logs().list(&test_id).await;
    Json(json!({ "testId": test_id, "status": status, "logs": logs }))
}

async fn test_results(State(state): State<AppState>, Path(test_id): Path<String>) -> Json<Value> {
    match state.engine.results(&test_id).await {
        Some(snapshot) => Json(json!(snapshot)),
        None => Json(json!({ "error": "Test not found" })),
    }
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    level: Option<LogLevel>,
}

async fn test_logs(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Json<Value> {
    let logs = match query.level {
        Some(level) => state.engine.logs().list_by_level(&test_id, level).await,
        None => state.engine.logs().list(&test_id).await,
    };
    Json(json!({ "testId": test_id, "logs": logs }))
}

async fn export_logs(State(state): State<AppState>, Path(test_id): Path<String>) -> Response {
    let text = state.engine.logs().export(&test_id).await;
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}

async fn clear_logs(State(state): State<AppState>, Path(test_id): Path<String>) -> StatusCode {
    state.engine.logs().clear(&test_id).await;
    StatusCode::NO_CONTENT
}
