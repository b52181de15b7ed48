//! Context assembly and per-turn session state.
//!
//! [`assemble_window`] is the pure windowing rule: everything after the
//! active summary's boundary is always kept, and older history is pulled
//! in newest-first only while the token budget is unmet.
//!
//! [`SessionManager`] owns one turn's view of a session. It resolves (or
//! creates) the user and session while fetching context, and tracks the
//! [`TurnState`] counters the summarizer needs.

use std::collections::BTreeSet;
use std::sync::Arc;

use tl_domain::config::ContextConfig;
use tl_domain::error::{Error, Result};
use tl_domain::message::Message;
use tl_domain::session::{Session, User};
use tl_domain::summary::Summary;
use tl_domain::trace::TraceEvent;
use tl_providers::TurnCounters;
use tl_sessions::PersistenceGateway;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Window assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The assembled context window and its post-summary counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextWindow {
    /// Chronological.
    pub messages: Vec<Message>,
    /// Distinct turns after the summary boundary.
    pub turns_after_last_summary: u32,
    /// Tokens of the whole window, including older history pulled in.
    pub total_token_after_last_summary: u32,
}

impl ContextWindow {
    pub fn token_count(&self) -> u32 {
        self.messages
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(m.token_count))
    }
}

/// Build the context window from chronologically ordered `fetched`
/// messages and the active summary.
pub fn assemble_window(
    fetched: Vec<Message>,
    summary: Option<&Summary>,
    max_token_threshold: u32,
) -> ContextWindow {
    let boundary = summary.map(|s| s.end_turn_number).unwrap_or(0);
    let (mut before, after): (Vec<Message>, Vec<Message>) = fetched
        .into_iter()
        .partition(|m| m.turn_number <= boundary);

    let turns_after_last_summary = after
        .iter()
        .map(|m| m.turn_number)
        .collect::<BTreeSet<_>>()
        .len() as u32;
    let mut total = after
        .iter()
        .fold(0u32, |acc, m| acc.saturating_add(m.token_count));

    let mut older = Vec::new();
    while total < max_token_threshold {
        let Some(msg) = before.pop() else {
            break;
        };
        total = total.saturating_add(msg.token_count);
        older.push(msg);
    }
    older.reverse();
    older.extend(after);

    ContextWindow {
        messages: older,
        turns_after_last_summary,
        total_token_after_last_summary: total,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable counters for the turn being produced. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    /// One past the session's last durably recorded turn.
    pub turn_number: u32,
    /// Tool-call sub-iterations taken so far.
    pub step: u32,
    pub turns_after_last_summary: u32,
    pub total_token_after_last_summary: u32,
    pub active_summary: Option<Summary>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    store: Arc<dyn PersistenceGateway>,
    session_id: String,
    client_id: String,
    new_chat: bool,
    default_name: String,
    context: ContextConfig,
    user: Option<User>,
    session: Option<Session>,
    pub state: TurnState,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        session_id: impl Into<String>,
        client_id: impl Into<String>,
        new_chat: bool,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            client_id: client_id.into(),
            new_chat,
            default_name: tl_domain::config::SessionsConfig::default().default_name,
            context: ContextConfig::default(),
            user: None,
            session: None,
            state: TurnState::default(),
        }
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_new_chat(&self) -> bool {
        self.new_chat
    }

    /// The resolved session, once [`assemble_context`](Self::assemble_context) ran.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn PersistenceGateway> {
        &self.store
    }

    pub fn counters(&self) -> TurnCounters {
        TurnCounters {
            turn_number: self.state.turn_number,
            turns_after_last_summary: self.state.turns_after_last_summary,
            total_token_after_last_summary: self.state.total_token_after_last_summary,
        }
    }

    /// Resolve the session and fetch its context concurrently, then update
    /// the turn counters. Returns the window in chronological order; the
    /// active summary lands in `state.active_summary`.
    pub async fn assemble_context(&mut self) -> Result<Vec<Message>> {
        let (resolved, fetched) = tokio::join!(self.resolve_session(), self.fetch_context());
        let (user, session, created) = resolved?;
        let (messages, summary) = fetched?;

        TraceEvent::SessionResolved {
            session_id: session.id.clone(),
            user_id: user.id.clone(),
            is_new: created,
        }
        .emit();

        let window = assemble_window(messages, summary.as_ref(), self.context.max_token_threshold);
        self.state.turn_number = session.next_turn_number();
        self.state.turns_after_last_summary = window.turns_after_last_summary;
        self.state.total_token_after_last_summary = window.total_token_after_last_summary;
        self.state.active_summary = summary;

        tracing::Span::current().record("turn_number", self.state.turn_number);
        TraceEvent::ContextAssembled {
            session_id: self.session_id.clone(),
            turn_number: self.state.turn_number,
            window_messages: window.messages.len(),
            window_tokens: window.token_count(),
            turns_after_last_summary: window.turns_after_last_summary,
            has_summary: self.state.active_summary.is_some(),
        }
        .emit();

        self.user = Some(user);
        self.session = Some(session);
        Ok(window.messages)
    }

    /// Latest persisted summary, for the fallback path. Failures are logged
    /// and treated as "no summary".
    pub async fn latest_summary_for_fallback(&self) -> Option<Summary> {
        self.session.as_ref()?;
        match self.store.latest_summary(&self.session_id).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "could not load summary for fallback");
                None
            }
        }
    }

    async fn fetch_context(&self) -> Result<(Vec<Message>, Option<Summary>)> {
        if self.new_chat {
            return Ok((Vec::new(), None));
        }
        let (messages, summary) = tokio::join!(
            self.store
                .latest_messages(&self.session_id, self.context.max_turns_to_fetch),
            self.store.latest_summary(&self.session_id),
        );
        let messages = messages.map_err(as_retrieval_error)?;
        let summary = summary.map_err(as_retrieval_error)?;
        Ok((messages, summary))
    }

    /// Returns the user, the session, and whether the session was created.
    async fn resolve_session(&self) -> Result<(User, Session, bool)> {
        let store = &self.store;
        if self.new_chat {
            return match store.get_user(&self.client_id).await? {
                Some(user) => {
                    let session = store
                        .create_session_for_user(&user, &self.session_id, &self.default_name)
                        .await?;
                    Ok((user, session, true))
                }
                None => {
                    let (user, session) = store
                        .create_session_with_user(&self.client_id, &self.session_id, &self.default_name)
                        .await?;
                    Ok((user, session, true))
                }
            };
        }

        let session = store
            .get_session(&self.session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(self.session_id.clone()))?;
        let user = store
            .get_user(&self.client_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(self.client_id.clone()))?;
        // Another user's session is reported as missing.
        if session.user_id != user.id {
            return Err(Error::SessionNotFound(self.session_id.clone()));
        }
        Ok((user, session, false))
    }
}

fn as_retrieval_error(e: Error) -> Error {
    if e.is_identity() {
        e
    } else {
        Error::MessageRetrieval(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tl_sessions::MemoryStore;

    fn msg(turn: u32, tokens: u32) -> Message {
        let mut m = Message::human(None, format!("turn {turn}"));
        m.turn_number = turn;
        m.token_count = tokens;
        m
    }

    fn summary_until(end: u32) -> Summary {
        Summary {
            id: "sum-1".into(),
            content: "earlier".into(),
            token_count: 10,
            start_turn_number: 1,
            end_turn_number: end,
            created_at: Utc::now(),
        }
    }

    fn turns(window: &ContextWindow) -> Vec<u32> {
        window.messages.iter().map(|m| m.turn_number).collect()
    }

    #[test]
    fn empty_history_gives_empty_window() {
        let window = assemble_window(Vec::new(), None, 5000);
        assert!(window.messages.is_empty());
        assert_eq!(window.turns_after_last_summary, 0);
        assert_eq!(window.total_token_after_last_summary, 0);
    }

    #[test]
    fn no_summary_keeps_everything_under_budget() {
        let fetched = vec![msg(1, 10), msg(1, 20), msg(2, 20)];
        let window = assemble_window(fetched, None, 5000);
        assert_eq!(turns(&window), vec![1, 1, 2]);
        assert_eq!(window.turns_after_last_summary, 2);
        assert_eq!(window.total_token_after_last_summary, 50);
    }

    #[test]
    fn post_summary_tail_is_never_trimmed() {
        let fetched = vec![msg(4, 100), msg(5, 100), msg(6, 9000), msg(7, 9000)];
        let summary = summary_until(5);
        let window = assemble_window(fetched, Some(&summary), 1000);
        assert_eq!(turns(&window), vec![6, 7]);
        assert_eq!(window.turns_after_last_summary, 2);
        assert_eq!(window.total_token_after_last_summary, 18000);
    }

    #[test]
    fn older_history_fills_budget_newest_first() {
        // Turns 1..=5 are summarized at 600 tokens each; 6 and 7 total 200.
        let mut fetched: Vec<Message> = (1..=5).map(|t| msg(t, 600)).collect();
        fetched.push(msg(6, 100));
        fetched.push(msg(7, 100));
        let summary = summary_until(5);

        let window = assemble_window(fetched, Some(&summary), 1500);
        // 200 + 600 (turn 5) + 600 (turn 4) + 600 (turn 3) reaches the budget.
        assert_eq!(turns(&window), vec![3, 4, 5, 6, 7]);
        assert_eq!(window.turns_after_last_summary, 2);
        assert_eq!(window.total_token_after_last_summary, 2000);
        assert!(window.token_count() >= 1500);
    }

    #[test]
    fn unreachable_budget_includes_all_fetched() {
        let fetched: Vec<Message> = (1..=7).map(|t| msg(t, 50)).collect();
        let summary = summary_until(5);
        let window = assemble_window(fetched, Some(&summary), 5000);
        assert_eq!(window.messages.len(), 7);
        assert_eq!(window.token_count(), 350);
    }

    #[test]
    fn summary_covering_everything_yields_empty_tail() {
        let fetched = vec![msg(1, 10), msg(2, 10)];
        let summary = summary_until(2);
        let window = assemble_window(fetched, Some(&summary), 0);
        assert!(window.messages.is_empty());
        assert_eq!(window.turns_after_last_summary, 0);
    }

    #[tokio::test]
    async fn new_chat_creates_user_and_session() {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        let mut manager = SessionManager::new(store.clone(), "s-new", "client-1", true)
            .with_default_name("Fresh");

        let window = manager.assemble_context().await.unwrap();
        assert!(window.is_empty());
        assert_eq!(manager.state.turn_number, 1);
        assert_eq!(manager.session().unwrap().name, "Fresh");
        assert!(store.get_user("client-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn existing_user_gets_additional_session() {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        let (user, _) = store
            .create_session_with_user("client-1", "s-1", "First")
            .await
            .unwrap();

        let mut manager = SessionManager::new(store.clone(), "s-2", "client-1", true);
        manager.assemble_context().await.unwrap();
        assert_eq!(manager.user().unwrap().id, user.id);
        assert_eq!(manager.session().unwrap().user_id, user.id);
    }

    #[tokio::test]
    async fn unknown_session_is_an_identity_error() {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        let mut manager = SessionManager::new(store, "missing", "client-1", false);
        let err = manager.assemble_context().await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn foreign_session_is_reported_missing() {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        store
            .create_session_with_user("owner", "s-1", "Mine")
            .await
            .unwrap();
        store
            .create_session_with_user("intruder", "s-2", "Theirs")
            .await
            .unwrap();

        let mut manager = SessionManager::new(store, "s-1", "intruder", false);
        let err = manager.assemble_context().await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn turn_number_follows_last_recorded_turn() {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        store
            .create_session_with_user("client-1", "s-1", "Chat")
            .await
            .unwrap();
        let pair = vec![Message::human(None, "hi"), Message::fallback_reply()];
        store.insert_messages("s-1", &pair, 1, None).await.unwrap();
        store.insert_messages("s-1", &pair, 2, None).await.unwrap();

        let mut manager = SessionManager::new(store, "s-1", "client-1", false);
        let window = manager.assemble_context().await.unwrap();
        assert_eq!(window.len(), 4);
        assert_eq!(manager.state.turn_number, 3);
        assert_eq!(manager.state.turns_after_last_summary, 2);
        assert_eq!(manager.counters().turn_number, 3);
    }
}
