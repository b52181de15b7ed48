//! Chat API endpoints, one turn per request.
//!
//! - `POST /v1/chat` returns the full result as JSON
//! - `POST /v1/chat/stream` streams UI message events, then `data-session`
//!   with the result, then `[DONE]`

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;

use tl_domain::query::TurnRequest;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(State(state): State<AppState>, Json(body): Json<TurnRequest>) -> Response {
    match state.runner.run(body).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "chat request failed");
            super::error_response(&e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<TurnRequest>,
) -> impl IntoResponse {
    let (events, pending) = state.runner.run_stream(body);

    // The turn finishes and persists even if the client goes away.
    tokio::spawn(async move {
        if let Err(e) = pending.await {
            tracing::info!(error = %e, "streamed turn ended without a result");
        }
    });

    let body = Body::from_stream(events.map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-vercel-ai-ui-message-stream"), "v1"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
}
