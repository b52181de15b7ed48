//! Process-local persistence backend. Nothing survives a restart.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use tl_domain::error::{Error, Result};
use tl_domain::message::Message;
use tl_domain::page::Page;
use tl_domain::session::{Deletion, Session, User};
use tl_domain::summary::{GeneratedSummary, Summary};

use crate::store::{
    new_summary, owned_session_ids, page_newest_first, select_latest_turns, sessions_page,
    stamp_messages, PersistenceGateway, StoredMessage, StoredSummary,
};

#[derive(Default)]
pub struct MemoryStore {
    /// Keyed by client id.
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<StoredMessage>>>,
    summaries: RwLock<HashMap<String, Vec<StoredSummary>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_session(&self, user: &User, session_id: &str, name: &str) -> Result<Session> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            return Err(Error::Storage(format!("session {session_id} already exists")));
        }
        let session = Session::new(session_id, name, &user.id);
        sessions.insert(session_id.to_owned(), session.clone());
        Ok(session)
    }

    fn owns(&self, client_id: &str, session_id: &str) -> bool {
        let users = self.users.read();
        let sessions = self.sessions.read();
        match (users.get(client_id), sessions.get(session_id)) {
            (Some(user), Some(session)) => session.user_id == user.id,
            _ => false,
        }
    }

    /// Drop a session and everything recorded under it.
    fn remove_session(&self, session_id: &str) -> Deletion {
        let removed = self.sessions.write().remove(session_id);
        let messages = self.messages.write().remove(session_id);
        let summaries = self.summaries.write().remove(session_id);
        Deletion {
            sessions_deleted: u64::from(removed.is_some()),
            messages_deleted: messages.map_or(0, |rows| rows.len() as u64),
            summaries_deleted: summaries.map_or(0, |rows| rows.len() as u64),
        }
    }
}

#[async_trait::async_trait]
impl PersistenceGateway for MemoryStore {
    async fn get_user(&self, client_id: &str) -> Result<Option<User>> {
        Ok(self.users.read().get(client_id).cloned())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn create_session_with_user(
        &self,
        client_id: &str,
        session_id: &str,
        name: &str,
    ) -> Result<(User, Session)> {
        let user = self
            .users
            .write()
            .entry(client_id.to_owned())
            .or_insert_with(|| User::new(client_id))
            .clone();
        let session = self.insert_session(&user, session_id, name)?;
        Ok((user, session))
    }

    async fn create_session_for_user(
        &self,
        user: &User,
        session_id: &str,
        name: &str,
    ) -> Result<Session> {
        self.insert_session(user, session_id, name)
    }

    async fn latest_messages(&self, session_id: &str, max_turns: u32) -> Result<Vec<Message>> {
        let messages = self.messages.read();
        Ok(messages
            .get(session_id)
            .map(|rows| select_latest_turns(rows, max_turns))
            .unwrap_or_default())
    }

    async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>> {
        let summaries = self.summaries.read();
        Ok(summaries
            .get(session_id)
            .and_then(|rows| rows.last())
            .map(|s| s.summary.clone()))
    }

    async fn insert_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        turn_number: u32,
        previous_summary_id: Option<&str>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;

        let rows = stamp_messages(session_id, messages, turn_number, previous_summary_id);
        self.messages
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .extend(rows);

        session.latest_turn_number = session.latest_turn_number.max(turn_number);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn create_summary(&self, session_id: &str, summary: &GeneratedSummary) -> Result<Summary> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_owned()));
        }
        let row = new_summary(session_id, summary);
        let out = row.summary.clone();
        self.summaries
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .push(row);
        Ok(out)
    }

    async fn list_sessions(
        &self,
        client_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Session>> {
        let users = self.users.read();
        let sessions = self.sessions.read();
        Ok(sessions_page(&users, &sessions, client_id, page, page_size))
    }

    async fn rename_session(&self, client_id: &str, session_id: &str, name: &str) -> Result<bool> {
        if !self.owns(client_id, session_id) {
            return Ok(false);
        }
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(false);
        };
        session.name = name.to_owned();
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_session(&self, client_id: &str, session_id: &str) -> Result<Deletion> {
        if !self.owns(client_id, session_id) {
            return Ok(Deletion::default());
        }
        Ok(self.remove_session(session_id))
    }

    async fn delete_all_sessions(&self, client_id: &str) -> Result<Deletion> {
        let ids = {
            let users = self.users.read();
            let sessions = self.sessions.read();
            owned_session_ids(&users, &sessions, client_id)
        };
        let mut total = Deletion::default();
        for id in ids {
            total.absorb(self.remove_session(&id));
        }
        Ok(total)
    }

    async fn list_messages(
        &self,
        session_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Message>> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_owned()));
        }
        let messages = self.messages.read();
        let rows = messages.get(session_id).map(Vec::as_slice).unwrap_or_default();
        Ok(page_newest_first(rows, page, page_size))
    }

    async fn delete_message(&self, client_id: &str, message_id: &str) -> Result<bool> {
        let ids = {
            let users = self.users.read();
            let sessions = self.sessions.read();
            owned_session_ids(&users, &sessions, client_id)
        };
        let mut messages = self.messages.write();
        for id in ids {
            let Some(rows) = messages.get_mut(&id) else {
                continue;
            };
            if let Some(pos) = rows.iter().position(|r| r.message.id == message_id) {
                rows.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_advances_latest_turn() {
        let store = MemoryStore::new();
        let (user, session) = store
            .create_session_with_user("client-1", "s1", "New Chat")
            .await
            .unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.latest_turn_number, 0);

        let pair = [Message::human(None, "hi"), Message::ai()];
        store.insert_messages("s1", &pair, 1, None).await.unwrap();

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.latest_turn_number, 1);
        let msgs = store.latest_messages("s1", 10).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.turn_number == 1));
    }

    #[tokio::test]
    async fn insert_into_unknown_session_fails() {
        let store = MemoryStore::new();
        let err = store
            .insert_messages("nope", &[Message::ai()], 1, None)
            .await
            .unwrap_err();
        assert!(err.is_identity());
    }

    #[tokio::test]
    async fn second_session_reuses_user() {
        let store = MemoryStore::new();
        let (user, _) = store
            .create_session_with_user("client-1", "s1", "New Chat")
            .await
            .unwrap();
        let s2 = store.create_session_for_user(&user, "s2", "Other").await.unwrap();
        assert_eq!(s2.user_id, user.id);
        assert_eq!(store.get_user("client-1").await.unwrap().unwrap().id, user.id);
        assert!(store.create_session_for_user(&user, "s2", "dup").await.is_err());
    }

    async fn seeded(store: &MemoryStore) {
        store
            .create_session_with_user("client-1", "s1", "New Chat")
            .await
            .unwrap();
        let user = store.get_user("client-1").await.unwrap().unwrap();
        store.create_session_for_user(&user, "s2", "Second").await.unwrap();
        store
            .create_session_with_user("client-2", "other", "Theirs")
            .await
            .unwrap();
        for turn in 1..=3 {
            let pair = [Message::human(Some(format!("q{turn}")), "hi"), Message::ai()];
            store.insert_messages("s1", &pair, turn, None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_owner() {
        let store = MemoryStore::new();
        seeded(&store).await;

        let page = store.list_sessions("client-1", 1, 10).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert!(page.items.iter().all(|s| s.id != "other"));
        // s1 was touched last by the inserts.
        assert_eq!(page.items[0].id, "s1");
    }

    #[tokio::test]
    async fn rename_requires_ownership() {
        let store = MemoryStore::new();
        seeded(&store).await;

        assert!(!store.rename_session("client-2", "s1", "Hijack").await.unwrap());
        assert!(store.rename_session("client-1", "s1", "Renamed").await.unwrap());
        assert_eq!(store.get_session("s1").await.unwrap().unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn delete_session_removes_related_records() {
        let store = MemoryStore::new();
        seeded(&store).await;
        store
            .create_summary(
                "s1",
                &GeneratedSummary {
                    content: "recap".into(),
                    token_count: 1,
                    start_turn_number: 1,
                    end_turn_number: 2,
                },
            )
            .await
            .unwrap();

        let foreign = store.delete_session("client-2", "s1").await.unwrap();
        assert_eq!(foreign, Deletion::default());

        let removed = store.delete_session("client-1", "s1").await.unwrap();
        assert_eq!(removed.sessions_deleted, 1);
        assert_eq!(removed.messages_deleted, 6);
        assert_eq!(removed.summaries_deleted, 1);
        assert!(store.get_session("s1").await.unwrap().is_none());
        assert!(store.latest_summary("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_all_leaves_other_clients_alone() {
        let store = MemoryStore::new();
        seeded(&store).await;

        let removed = store.delete_all_sessions("client-1").await.unwrap();
        assert_eq!(removed.sessions_deleted, 2);
        assert_eq!(removed.messages_deleted, 6);
        assert!(store.get_session("other").await.unwrap().is_some());
        assert_eq!(store.list_sessions("client-1", 1, 10).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn message_pages_and_single_delete() {
        let store = MemoryStore::new();
        seeded(&store).await;

        let page = store.list_messages("s1", 1, 2).await.unwrap();
        assert_eq!(page.total_count, 6);
        assert_eq!(page.items[0].id, "q3");
        assert!(page.items.iter().all(|m| m.turn_number == 3));

        assert!(!store.delete_message("client-2", "q3").await.unwrap());
        assert!(store.delete_message("client-1", "q3").await.unwrap());
        assert_eq!(store.list_messages("s1", 1, 10).await.unwrap().total_count, 5);
        assert!(store.list_messages("ghost", 1, 10).await.unwrap_err().is_identity());
    }

    #[tokio::test]
    async fn latest_summary_is_most_recent() {
        let store = MemoryStore::new();
        store
            .create_session_with_user("c", "s1", "New Chat")
            .await
            .unwrap();
        for end in [3, 6] {
            store
                .create_summary(
                    "s1",
                    &GeneratedSummary {
                        content: format!("up to {end}"),
                        token_count: 3,
                        start_turn_number: 1,
                        end_turn_number: end,
                    },
                )
                .await
                .unwrap();
        }
        let latest = store.latest_summary("s1").await.unwrap().unwrap();
        assert_eq!(latest.end_turn_number, 6);
    }
}
