use serde::{Deserialize, Serialize};

/// The user's query for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQuery {
    pub query: String,
    /// Client-side message id, reused for the stored human message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A request to run one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Existing session to continue. `None` starts a new chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub client_id: String,
    pub message: MessageQuery,
}

impl TurnRequest {
    pub fn new(client_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: None,
            client_id: client_id.into(),
            message: MessageQuery {
                query: query.into(),
                id: None,
            },
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn is_new_chat(&self) -> bool {
        self.session_id.is_none()
    }
}
