/// Shared error type used across all Threadline crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("message retrieval failed: {0}")]
    MessageRetrieval(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("agent exceeded maximum number of steps allowed (current step: {current}, max steps: {max})")]
    StepLimitExceeded { current: u32, max: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that mean the request itself is invalid (unknown session or
    /// user, unreadable history). These are never downgraded to a fallback
    /// answer.
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_) | Error::UserNotFound(_) | Error::MessageRetrieval(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
