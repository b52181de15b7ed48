//! Chat naming: title a conversation from its latest query, with the
//! session's recent history and summary as context when there is one.

use tl_domain::config::ChatNamingConfig;
use tl_domain::error::{Error, Result};
use tl_domain::session::Session;
use tl_providers::{ChatNameRequest, LlmProvider};
use tl_sessions::PersistenceGateway;

/// The session `session_id` if `client_id` owns it. Another client's
/// session is reported as missing.
pub async fn owned_session(
    store: &dyn PersistenceGateway,
    client_id: &str,
    session_id: &str,
) -> Result<Session> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
    let user = store
        .get_user(client_id)
        .await?
        .ok_or_else(|| Error::UserNotFound(client_id.to_owned()))?;
    if session.user_id != user.id {
        return Err(Error::SessionNotFound(session_id.to_owned()));
    }
    Ok(session)
}

/// Generate a title for `query`. `existing` names a `(client_id,
/// session_id)` pair whose last `context_turns` turns and latest summary
/// are given to the namer.
pub async fn generate_chat_name(
    provider: &dyn LlmProvider,
    store: &dyn PersistenceGateway,
    cfg: &ChatNamingConfig,
    query: &str,
    existing: Option<(&str, &str)>,
) -> Result<String> {
    let mut req = ChatNameRequest {
        query: query.to_owned(),
        max_words: cfg.max_words,
        max_length: cfg.max_length,
        ..ChatNameRequest::default()
    };

    if let Some((client_id, session_id)) = existing {
        owned_session(store, client_id, session_id).await?;
        let window = cfg.context_turns.saturating_mul(2);
        let (messages, summary) = tokio::join!(
            store.list_messages(session_id, 1, window),
            store.latest_summary(session_id),
        );
        req.conversation = messages?.items;
        req.previous_summary = summary?.map(|s| s.content);
    }

    let name = provider.generate_chat_name(&req).await?;
    tracing::debug!(name = %name, with_context = existing.is_some(), "chat name generated");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_domain::message::Message;
    use tl_domain::summary::GeneratedSummary;
    use tl_providers::ScriptedProvider;
    use tl_sessions::MemoryStore;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_session_with_user("client-1", "s-1", "New Chat")
            .await
            .unwrap();
        for turn in 1..=3 {
            let mut reply = Message::ai();
            reply.push_text(&format!("answer {turn}"));
            let pair = [Message::human(None, format!("question {turn}")), reply];
            store.insert_messages("s-1", &pair, turn, None).await.unwrap();
        }
        store
            .create_summary(
                "s-1",
                &GeneratedSummary {
                    content: "talked about numbers".into(),
                    token_count: 3,
                    start_turn_number: 1,
                    end_turn_number: 3,
                },
            )
            .await
            .unwrap();
        store
    }

    fn cfg(context_turns: u32) -> ChatNamingConfig {
        ChatNamingConfig {
            context_turns,
            ..ChatNamingConfig::default()
        }
    }

    #[tokio::test]
    async fn fresh_query_is_named_without_context() {
        let provider = ScriptedProvider::new();
        let store = MemoryStore::new();
        let name = generate_chat_name(
            &provider,
            &store,
            &ChatNamingConfig::default(),
            "How do I reverse a linked list in place",
            None,
        )
        .await
        .unwrap();

        assert_eq!(name, "How do I reverse a");
        let seen = provider.last_chat_name_request().unwrap();
        assert!(seen.conversation.is_empty());
        assert!(seen.previous_summary.is_none());
    }

    #[tokio::test]
    async fn existing_session_supplies_recent_turns_and_summary() {
        let provider = ScriptedProvider::new();
        provider.push_chat_name("Counting Practice");
        let store = seeded().await;

        let name = generate_chat_name(
            &provider,
            &store,
            &cfg(2),
            "and four?",
            Some(("client-1", "s-1")),
        )
        .await
        .unwrap();

        assert_eq!(name, "Counting Practice");
        let seen = provider.last_chat_name_request().unwrap();
        let texts: Vec<String> = seen.conversation.iter().map(Message::text).collect();
        assert_eq!(texts, ["question 2", "answer 2", "question 3", "answer 3"]);
        assert_eq!(seen.previous_summary.as_deref(), Some("talked about numbers"));
    }

    #[tokio::test]
    async fn foreign_session_is_not_found() {
        let provider = ScriptedProvider::new();
        let store = seeded().await;
        store
            .create_session_with_user("client-2", "s-2", "New Chat")
            .await
            .unwrap();

        let err = generate_chat_name(
            &provider,
            &store,
            &cfg(2),
            "hi",
            Some(("client-2", "s-1")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        assert!(provider.last_chat_name_request().is_none());
    }
}
