use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::{relay::sse_records, types::HealthResponse, AppState};
use crate::{error::ProxyError, model::CompletionRequestBody};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `POST /api/completion`: validates the body, opens the upstream stream and
/// relays it as server-sent events.
pub async fn completion(
    State(state): State<AppState>,
    payload: Result<Json<CompletionRequestBody>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let request_id = Uuid::new_v4().to_string();

    let Json(body) = payload.map_err(|rejection| {
        ProxyError::validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;
    let req = body.validate().inspect_err(|err| {
        info!(request_id = request_id.as_str(), error = %err, "rejected completion request");
    })?;

    info!(
        request_id = request_id.as_str(),
        model = req.model.as_str(),
        prompt_chars = req.prompt.chars().count(),
        max_tokens = state.max_tokens,
        "completion request"
    );

    let deltas = state
        .upstream
        .stream_chat(&req.model, &req.prompt, state.max_tokens)
        .await
        .map_err(|err| {
            warn!(request_id = request_id.as_str(), error = %err, "upstream call failed");
            ProxyError::from(err)
        })?;

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_records(deltas, request_id)))
        .map_err(ProxyError::unknown)
        .map(IntoResponse::into_response)
}
