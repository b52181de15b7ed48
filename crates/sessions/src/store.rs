//! The persistence gateway contract and the record shapes backends share.
//!
//! Domain messages and summaries carry only public fields. The stored
//! records wrap them with the internal `session_id` / `previous_summary_id`
//! back-links, which never leave this crate.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tl_domain::config::{StorageBackend, StorageConfig};
use tl_domain::error::{Error, Result};
use tl_domain::message::Message;
use tl_domain::page::Page;
use tl_domain::session::{Deletion, Session, User};
use tl_domain::summary::{GeneratedSummary, Summary};

use crate::jsonl::JsonlStore;
use crate::memory::MemoryStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable store for users, sessions, messages and summaries.
///
/// Each call is atomic on its own. `insert_messages` appends the whole
/// batch and advances the session's `latest_turn_number` together.
#[async_trait::async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_user(&self, client_id: &str) -> Result<Option<User>>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Create a user for `client_id` together with its first session.
    async fn create_session_with_user(
        &self,
        client_id: &str,
        session_id: &str,
        name: &str,
    ) -> Result<(User, Session)>;

    async fn create_session_for_user(
        &self,
        user: &User,
        session_id: &str,
        name: &str,
    ) -> Result<Session>;

    /// Messages of the most recent `max_turns` recorded turns, oldest first.
    async fn latest_messages(&self, session_id: &str, max_turns: u32) -> Result<Vec<Message>>;

    /// The most recently created summary.
    async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>>;

    /// Append one turn's messages, stamping them with `turn_number` and the
    /// summary they were produced under.
    async fn insert_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        turn_number: u32,
        previous_summary_id: Option<&str>,
    ) -> Result<()>;

    async fn create_summary(&self, session_id: &str, summary: &GeneratedSummary) -> Result<Summary>;

    // ── Session management ───────────────────────────────────────────

    /// Sessions owned by `client_id`, most recently updated first. An
    /// unknown client gets an empty page.
    async fn list_sessions(&self, client_id: &str, page: u32, page_size: u32)
        -> Result<Page<Session>>;

    /// Rename a session owned by `client_id`. `false` when the client owns
    /// no such session.
    async fn rename_session(&self, client_id: &str, session_id: &str, name: &str)
        -> Result<bool>;

    /// Delete a session owned by `client_id` together with its messages
    /// and summaries.
    async fn delete_session(&self, client_id: &str, session_id: &str) -> Result<Deletion>;

    /// Delete every session owned by `client_id` with related records.
    async fn delete_all_sessions(&self, client_id: &str) -> Result<Deletion>;

    /// Messages of a session, newest page first. Items within a page are
    /// chronological.
    async fn list_messages(&self, session_id: &str, page: u32, page_size: u32)
        -> Result<Page<Message>>;

    /// Delete one message by id, searched across the sessions `client_id`
    /// owns. `false` when no such message.
    async fn delete_message(&self, client_id: &str, message_id: &str) -> Result<bool>;
}

/// Open the backend selected by `[storage] backend`.
pub async fn open_store(cfg: &StorageConfig) -> Result<Arc<dyn PersistenceGateway>> {
    let store: Arc<dyn PersistenceGateway> = match cfg.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Jsonl => Arc::new(JsonlStore::open(&cfg.path).await?),
    };
    tracing::info!(backend = ?cfg.backend, "persistence gateway ready");
    Ok(store)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredMessage {
    #[serde(flatten)]
    pub message: Message,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_summary_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredSummary {
    #[serde(flatten)]
    pub summary: Summary,
    pub session_id: String,
}

pub(crate) fn stamp_messages(
    session_id: &str,
    messages: &[Message],
    turn_number: u32,
    previous_summary_id: Option<&str>,
) -> Vec<StoredMessage> {
    messages
        .iter()
        .map(|m| {
            let mut message = m.clone();
            message.turn_number = turn_number;
            StoredMessage {
                message,
                session_id: session_id.to_owned(),
                previous_summary_id: previous_summary_id.map(str::to_owned),
            }
        })
        .collect()
}

pub(crate) fn new_summary(session_id: &str, generated: &GeneratedSummary) -> StoredSummary {
    StoredSummary {
        summary: Summary {
            id: uuid::Uuid::new_v4().to_string(),
            content: generated.content.clone(),
            token_count: generated.token_count,
            start_turn_number: generated.start_turn_number,
            end_turn_number: generated.end_turn_number,
            created_at: chrono::Utc::now(),
        },
        session_id: session_id.to_owned(),
    }
}

/// Keep the messages belonging to the last `max_turns` distinct turns,
/// ordered by turn (stable within a turn).
pub(crate) fn select_latest_turns(stored: &[StoredMessage], max_turns: u32) -> Vec<Message> {
    let turns: BTreeSet<u32> = stored.iter().map(|s| s.message.turn_number).collect();
    let keep: BTreeSet<u32> = turns.into_iter().rev().take(max_turns as usize).collect();

    let mut out: Vec<Message> = stored
        .iter()
        .filter(|s| keep.contains(&s.message.turn_number))
        .map(|s| s.message.clone())
        .collect();
    out.sort_by_key(|m| m.turn_number);
    out
}

/// Page `page` of `stored`, counting from the newest message.
pub(crate) fn page_newest_first(stored: &[StoredMessage], page: u32, page_size: u32) -> Page<Message> {
    let newest_first: Vec<Message> = stored.iter().rev().map(|s| s.message.clone()).collect();
    let mut out = Page::slice(newest_first, page, page_size);
    out.items.reverse();
    out
}

/// Ids of the sessions owned by `client_id`.
pub(crate) fn owned_session_ids(
    users: &HashMap<String, User>,
    sessions: &HashMap<String, Session>,
    client_id: &str,
) -> Vec<String> {
    let Some(user) = users.get(client_id) else {
        return Vec::new();
    };
    sessions
        .values()
        .filter(|s| s.user_id == user.id)
        .map(|s| s.id.clone())
        .collect()
}

/// Sessions owned by `client_id`, most recently updated first.
pub(crate) fn sessions_page(
    users: &HashMap<String, User>,
    sessions: &HashMap<String, Session>,
    client_id: &str,
    page: u32,
    page_size: u32,
) -> Page<Session> {
    let mut owned: Vec<Session> = owned_session_ids(users, sessions, client_id)
        .iter()
        .filter_map(|id| sessions.get(id).cloned())
        .collect();
    owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    Page::slice(owned, page, page_size)
}

/// Session ids become file names; restrict them to a safe alphabet.
pub(crate) fn check_session_id(session_id: &str) -> Result<()> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::Storage(format!("invalid session id '{session_id}'")))
    }
}
