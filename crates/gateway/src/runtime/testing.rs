//! Test doubles shared by the runtime tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use tl_domain::error::{Error, Result};
use tl_domain::message::Message;
use tl_domain::page::Page;
use tl_domain::session::{Deletion, Session, User};
use tl_domain::summary::{GeneratedSummary, Summary};
use tl_sessions::{MemoryStore, PersistenceGateway};

/// A [`MemoryStore`] that fails selected writes on demand.
#[derive(Default)]
pub(crate) struct FaultyStore {
    pub inner: MemoryStore,
    /// Remaining `insert_messages` calls to fail.
    pub insert_failures: AtomicU32,
    /// Fail every session creation.
    pub refuse_sessions: AtomicBool,
}

impl FaultyStore {
    pub fn failing_inserts(n: u32) -> Self {
        Self {
            insert_failures: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn refusing_sessions() -> Self {
        Self {
            refuse_sessions: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn check_session_create(&self) -> Result<()> {
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return Err(Error::Storage("session table unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for FaultyStore {
    async fn get_user(&self, client_id: &str) -> Result<Option<User>> {
        self.inner.get_user(client_id).await
    }
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.inner.get_session(session_id).await
    }
    async fn create_session_with_user(
        &self,
        client_id: &str,
        session_id: &str,
        name: &str,
    ) -> Result<(User, Session)> {
        self.check_session_create()?;
        self.inner
            .create_session_with_user(client_id, session_id, name)
            .await
    }
    async fn create_session_for_user(
        &self,
        user: &User,
        session_id: &str,
        name: &str,
    ) -> Result<Session> {
        self.check_session_create()?;
        self.inner
            .create_session_for_user(user, session_id, name)
            .await
    }
    async fn latest_messages(&self, session_id: &str, max_turns: u32) -> Result<Vec<Message>> {
        self.inner.latest_messages(session_id, max_turns).await
    }
    async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>> {
        self.inner.latest_summary(session_id).await
    }
    async fn insert_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        turn_number: u32,
        previous_summary_id: Option<&str>,
    ) -> Result<()> {
        let remaining = self.insert_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.insert_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Storage("disk full".into()));
        }
        self.inner
            .insert_messages(session_id, messages, turn_number, previous_summary_id)
            .await
    }
    async fn create_summary(&self, session_id: &str, summary: &GeneratedSummary) -> Result<Summary> {
        self.inner.create_summary(session_id, summary).await
    }
    async fn list_sessions(
        &self,
        client_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Session>> {
        self.inner.list_sessions(client_id, page, page_size).await
    }
    async fn rename_session(&self, client_id: &str, session_id: &str, name: &str) -> Result<bool> {
        self.inner.rename_session(client_id, session_id, name).await
    }
    async fn delete_session(&self, client_id: &str, session_id: &str) -> Result<Deletion> {
        self.inner.delete_session(client_id, session_id).await
    }
    async fn delete_all_sessions(&self, client_id: &str) -> Result<Deletion> {
        self.inner.delete_all_sessions(client_id).await
    }
    async fn list_messages(
        &self,
        session_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Message>> {
        self.inner.list_messages(session_id, page, page_size).await
    }
    async fn delete_message(&self, client_id: &str, message_id: &str) -> Result<bool> {
        self.inner.delete_message(client_id, message_id).await
    }
}
