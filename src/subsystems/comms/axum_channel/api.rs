//! Axum handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::AxumState;
use crate::assistant::AssistantError;

#[derive(Deserialize)]
pub(super) struct QueryRequest {
    query: String,
}

fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

/// POST /query
///
/// A body that is not `{"query": "..."}` gets the same 400 as an empty query.
pub(super) async fn query(
    State(state): State<AxumState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                json_error("bad_request", rejection.body_text()),
            )
                .into_response();
        }
    };
    match tokio::time::timeout(
        state.query_timeout,
        state.comms.ask(&state.channel_id, &req.query),
    )
    .await
    {
        Ok(Ok(result)) => (StatusCode::OK, Json(result)).into_response(),
        Ok(Err(AssistantError::EmptyQuery)) => (
            StatusCode::BAD_REQUEST,
            json_error("bad_request", "query must not be empty"),
        )
            .into_response(),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "query failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("internal", e)).into_response()
        }
        Err(_) => {
            warn!(channel_id = %state.channel_id, "query timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                json_error("timeout", "query timed out"),
            )
                .into_response()
        }
    }
}

/// GET /api/health
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let body = json!({
        "status": "ok",
        "llm": state.comms.llm_name(),
        "retrievers": state.comms.retrievers(),
        "storage": state.comms.storage(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /api/projects
pub(super) async fn projects(State(state): State<AxumState>) -> Response {
    let projects = state.comms.projects().await;
    (StatusCode::OK, Json(json!({ "projects": projects }))).into_response()
}

pub(super) async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, json_error("not_found", "no such route")).into_response()
}
