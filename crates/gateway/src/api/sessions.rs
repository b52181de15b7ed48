//! Session management API endpoints.
//!
//! Every endpoint is scoped to the `client_id` it is given: another
//! client's sessions and messages look the same as missing ones.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use tl_domain::trace::TraceEvent;

use crate::runtime::{generate_chat_name, owned_session};
use crate::state::AppState;

use super::error_response;

/// Query string naming the calling client.
#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    pub client_id: String,
}

/// Query string for paged listings. `page` is 1-based.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub client_id: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The client's sessions, most recently updated first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Response {
    let page_size = state.config.sessions.page_size_for(q.page_size);
    match state
        .store
        .list_sessions(&q.client_id, q.page.unwrap_or(1), page_size)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "listing sessions failed");
            error_response(&e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_all_sessions(
    State(state): State<AppState>,
    Query(q): Query<ClientQuery>,
) -> Response {
    match state.store.delete_all_sessions(&q.client_id).await {
        Ok(deleted) => {
            tracing::info!(
                client_id = %q.client_id,
                sessions = deleted.sessions_deleted,
                messages = deleted.messages_deleted,
                "deleted all sessions"
            );
            Json(deleted).into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:session_id/rename
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RenameSessionBody {
    pub client_id: String,
    pub name: String,
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<RenameSessionBody>,
) -> Response {
    let name = body.name.trim();
    if name.is_empty() {
        return bad_request("name must not be empty");
    }
    match state
        .store
        .rename_session(&body.client_id, &session_id, name)
        .await
    {
        Ok(true) => Json(serde_json::json!({
            "session_id": session_id,
            "name": name,
            "session_updated": true,
        }))
        .into_response(),
        Ok(false) => not_found("session not found"),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delete one session with its messages and summaries. A session that
/// is still running a streamed turn is cancelled first.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(q): Query<ClientQuery>,
) -> Response {
    match state.store.delete_session(&q.client_id, &session_id).await {
        Ok(deleted) if deleted.sessions_deleted == 0 => not_found("session not found"),
        Ok(deleted) => {
            let was_running = state.cancel_map.cancel(&session_id);
            if was_running {
                TraceEvent::CancelRequested {
                    session_id: session_id.clone(),
                    was_running,
                }
                .emit();
            }
            Json(deleted).into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:session_id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Page 1 holds the newest messages; items within a page are in
/// chronological order.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Response {
    if let Err(e) = owned_session(state.store.as_ref(), &q.client_id, &session_id).await {
        return error_response(&e);
    }
    let page_size = state.config.sessions.page_size_for(q.page_size);
    match state
        .store
        .list_messages(&session_id, q.page.unwrap_or(1), page_size)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/messages/:message_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(q): Query<ClientQuery>,
) -> Response {
    match state.store.delete_message(&q.client_id, &message_id).await {
        Ok(true) => Json(serde_json::json!({
            "message_id": message_id,
            "deleted": true,
        }))
        .into_response(),
        Ok(false) => not_found("message not found"),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/name
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Request body for chat naming. With `session_id` the session's recent
/// history is used as context; `client_id` is then required.
#[derive(Debug, Deserialize)]
pub struct ChatNameBody {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Suggest a title. The session is not renamed; clients apply the name
/// with the rename endpoint.
pub async fn name_chat(State(state): State<AppState>, Json(body): Json<ChatNameBody>) -> Response {
    if body.query.trim().is_empty() {
        return bad_request("query must not be empty");
    }
    let existing = match (body.client_id.as_deref(), body.session_id.as_deref()) {
        (Some(client_id), Some(session_id)) => Some((client_id, session_id)),
        (None, Some(_)) => return bad_request("client_id is required with session_id"),
        _ => None,
    };

    match generate_chat_name(
        state.provider.as_ref(),
        state.store.as_ref(),
        &state.config.sessions.chat_name,
        &body.query,
        existing,
    )
    .await
    {
        Ok(name) => Json(serde_json::json!({ "name": name })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "chat naming failed");
            error_response(&e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:session_id/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancel the session's running streamed turn. The partial reply is
/// still persisted.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let was_running = state.cancel_map.cancel(&session_id);
    TraceEvent::CancelRequested {
        session_id: session_id.clone(),
        was_running,
    }
    .emit();

    if was_running {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "session_id": session_id, "stopped": true })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "session_id": session_id,
                "stopped": false,
                "error": "no running turn for this session",
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::to_bytes;
    use serde_json::Value;
    use tl_domain::config::{Config, ProviderKind, StorageBackend};
    use tl_domain::query::TurnRequest;

    use crate::bootstrap::build_app_state;

    async fn offline_state() -> AppState {
        let mut config = Config::default();
        config.llm.kind = ProviderKind::Scripted;
        config.storage.backend = StorageBackend::Memory;
        build_app_state(Arc::new(config)).await.unwrap()
    }

    /// Run one turn for `client_id`, returning the new session id.
    async fn chat(state: &AppState, client_id: &str, query: &str) -> String {
        state
            .runner
            .run(TurnRequest::new(client_id, query))
            .await
            .unwrap()
            .session_id
    }

    async fn body_json(resp: Response) -> (StatusCode, Value) {
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn list(client_id: &str, page: Option<u32>, page_size: Option<u32>) -> Query<ListQuery> {
        Query(ListQuery {
            client_id: client_id.into(),
            page,
            page_size,
        })
    }

    fn client(client_id: &str) -> Query<ClientQuery> {
        Query(ClientQuery {
            client_id: client_id.into(),
        })
    }

    #[tokio::test]
    async fn sessions_are_listed_per_client() {
        let state = offline_state().await;
        let first = chat(&state, "client-1", "one").await;
        let second = chat(&state, "client-1", "two").await;
        chat(&state, "client-2", "elsewhere").await;

        let resp = list_sessions(State(state.clone()), list("client-1", None, Some(1))).await;
        let (status, json) = body_json(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_count"], 2);
        assert_eq!(json["page_size"], 1);
        let ids: Vec<&str> = json["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["id"].as_str())
            .collect();
        assert!(ids == [second.as_str()] || ids == [first.as_str()]);
    }

    #[tokio::test]
    async fn rename_checks_ownership_and_input() {
        let state = offline_state().await;
        let session_id = chat(&state, "client-1", "hello").await;

        let body = |client_id: &str, name: &str| {
            Json(RenameSessionBody {
                client_id: client_id.into(),
                name: name.into(),
            })
        };

        let resp = rename_session(
            State(state.clone()),
            Path(session_id.clone()),
            body("client-1", "  Greetings  "),
        )
        .await;
        let (status, json) = body_json(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Greetings");
        let stored = state.store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Greetings");

        let resp = rename_session(
            State(state.clone()),
            Path(session_id.clone()),
            body("client-2", "Stolen"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = rename_session(State(state), Path(session_id), body("client-1", "   ")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn messages_are_paged_and_deletable() {
        let state = offline_state().await;
        let session_id = chat(&state, "client-1", "hello").await;

        let resp = list_messages(
            State(state.clone()),
            Path(session_id.clone()),
            list("client-1", Some(1), None),
        )
        .await;
        let (status, json) = body_json(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_count"], 2);
        assert_eq!(json["items"][0]["parts"][0]["text"], "hello");
        let message_id = json["items"][1]["id"].as_str().unwrap().to_owned();

        let resp = list_messages(
            State(state.clone()),
            Path(session_id.clone()),
            list("client-2", None, None),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = delete_message(
            State(state.clone()),
            Path(message_id.clone()),
            client("client-2"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = delete_message(State(state.clone()), Path(message_id), client("client-1")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = state.store.list_messages(&session_id, 1, 10).await.unwrap();
        assert_eq!(page.total_count, 1);
    }

    #[tokio::test]
    async fn deleting_sessions_reports_counts() {
        let state = offline_state().await;
        let first = chat(&state, "client-1", "one").await;
        chat(&state, "client-1", "two").await;
        let kept = chat(&state, "client-2", "three").await;

        let resp = delete_session(State(state.clone()), Path(first.clone()), client("client-2")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = delete_session(State(state.clone()), Path(first.clone()), client("client-1")).await;
        let (status, json) = body_json(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sessions_deleted"], 1);
        assert_eq!(json["messages_deleted"], 2);
        assert!(state.store.get_session(&first).await.unwrap().is_none());

        let resp = delete_all_sessions(State(state.clone()), client("client-1")).await;
        let (_, json) = body_json(resp).await;
        assert_eq!(json["sessions_deleted"], 1);
        assert!(state.store.get_session(&kept).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn chat_name_uses_session_context_when_given() {
        let state = offline_state().await;
        let session_id = chat(&state, "client-1", "hello").await;

        let resp = name_chat(
            State(state.clone()),
            Json(ChatNameBody {
                query: "Planning a garden for spring and summer".into(),
                session_id: Some(session_id.clone()),
                client_id: Some("client-1".into()),
            }),
        )
        .await;
        let (status, json) = body_json(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Planning a garden for spring");

        let resp = name_chat(
            State(state.clone()),
            Json(ChatNameBody {
                query: "hi".into(),
                session_id: Some(session_id),
                client_id: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = name_chat(
            State(state),
            Json(ChatNameBody {
                query: "  ".into(),
                session_id: None,
                client_id: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
