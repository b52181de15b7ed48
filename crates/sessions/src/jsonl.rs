//! File-backed persistence: a JSON snapshot of users and sessions plus
//! append-only JSONL logs per session.
//!
//! Layout under the configured root:
//!
//! ```text
//! index.json                       users + sessions
//! sessions/<id>.messages.jsonl     one stored message per line
//! sessions/<id>.summaries.jsonl    one stored summary per line
//! ```
//!
//! Logs are cached in memory after first read (write-through). All file I/O
//! runs on the blocking pool.
//!
//! Index changes are written to disk before they become visible. A message
//! batch is appended, then the index is committed; if either step fails the
//! log is truncated back to its previous length and nothing changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tl_domain::error::{Error, Result};
use tl_domain::message::Message;
use tl_domain::page::Page;
use tl_domain::session::{Deletion, Session, User};
use tl_domain::summary::{GeneratedSummary, Summary};

use crate::store::{
    check_session_id, new_summary, owned_session_ids, page_newest_first, select_latest_turns,
    sessions_page, stamp_messages, PersistenceGateway, StoredMessage, StoredSummary,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    /// Keyed by client id.
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    sessions: HashMap<String, Session>,
}

impl Index {
    fn owns(&self, client_id: &str, session_id: &str) -> bool {
        match (self.users.get(client_id), self.sessions.get(session_id)) {
            (Some(user), Some(session)) => session.user_id == user.id,
            _ => false,
        }
    }
}

pub struct JsonlStore {
    root: PathBuf,
    index: RwLock<Index>,
    /// Serializes index commits so the snapshot on disk always matches the
    /// live index.
    flush_lock: tokio::sync::Mutex<()>,
    /// Serializes writes to the per-session logs.
    log_lock: tokio::sync::Mutex<()>,
    messages: RwLock<HashMap<String, Vec<StoredMessage>>>,
    summaries: RwLock<HashMap<String, Vec<StoredSummary>>>,
}

impl JsonlStore {
    /// Load or create the store rooted at `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        let root = root.to_path_buf();
        let dir = root.join("sessions");
        let index_path = root.join("index.json");

        let index = tokio::task::spawn_blocking(move || -> Result<Index> {
            std::fs::create_dir_all(&dir).map_err(Error::Io)?;
            if !index_path.exists() {
                return Ok(Index::default());
            }
            let raw = std::fs::read_to_string(&index_path).map_err(Error::Io)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(format!("corrupt index {}: {e}", index_path.display())))
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        tracing::info!(
            users = index.users.len(),
            sessions = index.sessions.len(),
            path = %root.display(),
            "jsonl store loaded"
        );

        Ok(Self {
            root,
            index: RwLock::new(index),
            flush_lock: tokio::sync::Mutex::new(()),
            log_lock: tokio::sync::Mutex::new(()),
            messages: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
        })
    }

    fn messages_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{session_id}.messages.jsonl"))
    }

    fn summaries_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{session_id}.summaries.jsonl"))
    }

    /// Apply `edit` to a copy of the index, persist the copy (temp file +
    /// rename) and only then swap it in. On any error the live index is
    /// untouched.
    async fn commit_index<R, F>(&self, edit: F) -> Result<R>
    where
        F: FnOnce(&mut Index) -> Result<R> + Send,
        R: Send,
    {
        let _guard = self.flush_lock.lock().await;
        let mut next = self.index.read().clone();
        let out = edit(&mut next)?;

        let json = serde_json::to_string_pretty(&next)
            .map_err(|e| Error::Other(format!("serializing index: {e}")))?;
        let path = self.root.join("index.json");
        tokio::task::spawn_blocking(move || -> Result<()> {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json).map_err(Error::Io)?;
            std::fs::rename(&tmp, &path).map_err(Error::Io)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        *self.index.write() = next;
        Ok(out)
    }

    async fn create_session(&self, user: &User, session_id: &str, name: &str) -> Result<Session> {
        check_session_id(session_id)?;
        self.commit_index(|index| {
            if index.sessions.contains_key(session_id) {
                return Err(Error::Storage(format!("session {session_id} already exists")));
            }
            index
                .users
                .entry(user.client_id.clone())
                .or_insert_with(|| user.clone());
            let session = Session::new(session_id, name, &user.id);
            index.sessions.insert(session_id.to_owned(), session.clone());
            Ok(session)
        })
        .await
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        if let Some(rows) = self.messages.read().get(session_id) {
            return Ok(rows.clone());
        }
        let rows: Vec<StoredMessage> = read_jsonl(self.messages_path(session_id)).await?;
        self.messages
            .write()
            .entry(session_id.to_owned())
            .or_insert_with(|| rows.clone());
        Ok(rows)
    }

    async fn load_summaries(&self, session_id: &str) -> Result<Vec<StoredSummary>> {
        if let Some(rows) = self.summaries.read().get(session_id) {
            return Ok(rows.clone());
        }
        let rows: Vec<StoredSummary> = read_jsonl(self.summaries_path(session_id)).await?;
        self.summaries
            .write()
            .entry(session_id.to_owned())
            .or_insert_with(|| rows.clone());
        Ok(rows)
    }

    fn require_session(&self, session_id: &str) -> Result<()> {
        if self.index.read().sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(Error::SessionNotFound(session_id.to_owned()))
        }
    }

    /// Remove a session's logs and cache entries. The index entry must
    /// already be gone.
    async fn purge_logs(&self, session_id: &str) -> Result<Deletion> {
        let _guard = self.log_lock.lock().await;
        let messages = self.load_messages(session_id).await?.len() as u64;
        let summaries = self.load_summaries(session_id).await?.len() as u64;
        remove_file(self.messages_path(session_id)).await?;
        remove_file(self.summaries_path(session_id)).await?;
        self.messages.write().remove(session_id);
        self.summaries.write().remove(session_id);
        Ok(Deletion {
            sessions_deleted: 1,
            messages_deleted: messages,
            summaries_deleted: summaries,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceGateway for JsonlStore {
    async fn get_user(&self, client_id: &str) -> Result<Option<User>> {
        Ok(self.index.read().users.get(client_id).cloned())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.index.read().sessions.get(session_id).cloned())
    }

    async fn create_session_with_user(
        &self,
        client_id: &str,
        session_id: &str,
        name: &str,
    ) -> Result<(User, Session)> {
        let user = {
            let index = self.index.read();
            index.users.get(client_id).cloned()
        }
        .unwrap_or_else(|| User::new(client_id));
        let session = self.create_session(&user, session_id, name).await?;
        Ok((user, session))
    }

    async fn create_session_for_user(
        &self,
        user: &User,
        session_id: &str,
        name: &str,
    ) -> Result<Session> {
        self.create_session(user, session_id, name).await
    }

    async fn latest_messages(&self, session_id: &str, max_turns: u32) -> Result<Vec<Message>> {
        self.require_session(session_id)?;
        let rows = self
            .load_messages(session_id)
            .await
            .map_err(|e| Error::MessageRetrieval(e.to_string()))?;
        Ok(select_latest_turns(&rows, max_turns))
    }

    async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>> {
        self.require_session(session_id)?;
        let rows = self.load_summaries(session_id).await?;
        Ok(rows.last().map(|s| s.summary.clone()))
    }

    async fn insert_messages(
        &self,
        session_id: &str,
        messages: &[Message],
        turn_number: u32,
        previous_summary_id: Option<&str>,
    ) -> Result<()> {
        self.require_session(session_id)?;
        let _guard = self.log_lock.lock().await;
        // Warm the cache so the appended rows extend the full log.
        self.load_messages(session_id).await?;

        let rows = stamp_messages(session_id, messages, turn_number, previous_summary_id);
        let path = self.messages_path(session_id);
        let mark = file_len(path.clone()).await?;

        let written = async {
            append_jsonl(path.clone(), &rows).await?;
            self.commit_index(|index| {
                let session = index
                    .sessions
                    .get_mut(session_id)
                    .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
                session.latest_turn_number = session.latest_turn_number.max(turn_number);
                session.updated_at = Utc::now();
                Ok(())
            })
            .await
        }
        .await;

        if let Err(e) = written {
            rollback(path, mark).await;
            return Err(e);
        }

        self.messages
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .extend(rows);
        Ok(())
    }

    async fn create_summary(&self, session_id: &str, summary: &GeneratedSummary) -> Result<Summary> {
        self.require_session(session_id)?;
        let _guard = self.log_lock.lock().await;
        self.load_summaries(session_id).await?;

        let row = new_summary(session_id, summary);
        let path = self.summaries_path(session_id);
        let mark = file_len(path.clone()).await?;
        if let Err(e) = append_jsonl(path.clone(), std::slice::from_ref(&row)).await {
            rollback(path, mark).await;
            return Err(e);
        }
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
        let index = self.index.read();
        Ok(sessions_page(&index.users, &index.sessions, client_id, page, page_size))
    }

    async fn rename_session(&self, client_id: &str, session_id: &str, name: &str) -> Result<bool> {
        if !self.index.read().owns(client_id, session_id) {
            return Ok(false);
        }
        self.commit_index(|index| {
            if !index.owns(client_id, session_id) {
                return Ok(false);
            }
            let Some(session) = index.sessions.get_mut(session_id) else {
                return Ok(false);
            };
            session.name = name.to_owned();
            session.updated_at = Utc::now();
            Ok(true)
        })
        .await
    }

    async fn delete_session(&self, client_id: &str, session_id: &str) -> Result<Deletion> {
        let removed = self
            .commit_index(|index| {
                if !index.owns(client_id, session_id) {
                    return Ok(false);
                }
                index.sessions.remove(session_id);
                Ok(true)
            })
            .await?;
        if !removed {
            return Ok(Deletion::default());
        }
        self.purge_logs(session_id).await
    }

    async fn delete_all_sessions(&self, client_id: &str) -> Result<Deletion> {
        let ids = self
            .commit_index(|index| {
                let ids = owned_session_ids(&index.users, &index.sessions, client_id);
                for id in &ids {
                    index.sessions.remove(id);
                }
                Ok(ids)
            })
            .await?;

        let mut total = Deletion::default();
        for id in ids {
            total.absorb(self.purge_logs(&id).await?);
        }
        Ok(total)
    }

    async fn list_messages(
        &self,
        session_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Message>> {
        self.require_session(session_id)?;
        let rows = self
            .load_messages(session_id)
            .await
            .map_err(|e| Error::MessageRetrieval(e.to_string()))?;
        Ok(page_newest_first(&rows, page, page_size))
    }

    async fn delete_message(&self, client_id: &str, message_id: &str) -> Result<bool> {
        let ids = {
            let index = self.index.read();
            owned_session_ids(&index.users, &index.sessions, client_id)
        };
        let _guard = self.log_lock.lock().await;
        for id in ids {
            let mut rows = self.load_messages(&id).await?;
            let Some(pos) = rows.iter().position(|r| r.message.id == message_id) else {
                continue;
            };
            rows.remove(pos);
            rewrite_jsonl(self.messages_path(&id), &rows).await?;
            self.messages.write().insert(id, rows);
            return Ok(true);
        }
        Ok(false)
    }
}

// ── Private helpers ───────────────────────────────────────────────

async fn append_jsonl<T: Serialize>(path: PathBuf, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }

    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.write_all(buf.as_bytes()).map_err(Error::Io)?;
        file.sync_data().map_err(Error::Io)?;
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

async fn read_jsonl<T>(path: PathBuf) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut rows = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping malformed jsonl line"
                    );
                }
            }
        }
        Ok(rows)
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

async fn rewrite_jsonl<T: Serialize>(path: PathBuf, rows: &[T]) -> Result<()> {
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }
    tokio::task::spawn_blocking(move || {
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, buf).map_err(Error::Io)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

async fn file_len(path: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(move || match std::fs::metadata(&path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(Error::Io(e)),
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

/// Cut `path` back to `len` bytes after a failed write.
async fn rollback(path: PathBuf, len: u64) {
    let shown = path.display().to_string();
    let undone = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = match std::fs::OpenOptions::new().write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        file.set_len(len)?;
        file.sync_data()
    })
    .await;
    match undone {
        Ok(Ok(())) => tracing::warn!(path = %shown, len, "rolled back partial log write"),
        Ok(Err(e)) => tracing::error!(path = %shown, error = %e, "failed to roll back log write"),
        Err(e) => tracing::error!(path = %shown, error = %e, "rollback task failed"),
    }
}

async fn remove_file(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}
