use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat session. `latest_turn_number` only advances once a turn's
/// messages are durably written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub latest_turn_number: u32,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            latest_turn_number: 0,
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The turn number the next processed query will receive.
    pub fn next_turn_number(&self) -> u32 {
        self.latest_turn_number + 1
    }
}

/// The owner of sessions, keyed by the caller's client id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Row counts removed by a delete operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub sessions_deleted: u64,
    pub messages_deleted: u64,
    pub summaries_deleted: u64,
}

impl Deletion {
    pub fn absorb(&mut self, other: Deletion) {
        self.sessions_deleted += other.sessions_deleted;
        self.messages_deleted += other.messages_deleted;
        self.summaries_deleted += other.summaries_deleted;
    }
}
