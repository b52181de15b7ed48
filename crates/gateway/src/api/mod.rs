pub mod chat;
pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use tl_domain::error::Error;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Chat (core runtime)
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/chat/name", post(sessions::name_chat))
        // Sessions
        .route(
            "/v1/sessions",
            get(sessions::list_sessions).delete(sessions::delete_all_sessions),
        )
        .route("/v1/sessions/:session_id", delete(sessions::delete_session))
        .route("/v1/sessions/:session_id/rename", post(sessions::rename_session))
        .route("/v1/sessions/:session_id/messages", get(sessions::list_messages))
        .route("/v1/sessions/:session_id/stop", post(sessions::stop_session))
        // Messages
        .route("/v1/messages/:message_id", delete(sessions::delete_message))
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agent": state.config.agent.name,
        "provider": state.provider.provider_id(),
        "running_turns": state.cancel_map.len(),
    }))
}

/// Identity errors mean the request named something that does not exist;
/// everything else is a server-side failure.
pub(crate) fn error_response(e: &Error) -> Response {
    let status = if e.is_identity() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_errors_map_to_not_found() {
        let resp = error_response(&Error::SessionNotFound("s-1".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = error_response(&Error::MessageRetrieval("db down".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = error_response(&Error::Storage("disk full".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
