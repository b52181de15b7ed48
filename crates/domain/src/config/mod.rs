mod agent;
mod context;
mod llm;
mod server;
mod sessions;
mod storage;

pub use agent::*;
pub use context::*;
pub use llm::*;
pub use server::*;
pub use sessions::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml_from_str(raw)
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.agent.max_steps == 0 {
            errors.push(ConfigError::error(
                "agent.max_steps",
                "max_steps must be at least 1",
            ));
        }

        if self.context.max_turns_to_fetch == 0 {
            errors.push(ConfigError::error(
                "context.max_turns_to_fetch",
                "max_turns_to_fetch must be at least 1",
            ));
        }
        if self.context.max_token_threshold == 0 {
            errors.push(ConfigError::warning(
                "context.max_token_threshold",
                "threshold 0 never pulls pre-summary history into the window",
            ));
        }

        if self.llm.kind == ProviderKind::OpenaiCompat {
            if self.llm.base_url.is_empty() {
                errors.push(ConfigError::error("llm.base_url", "base_url must not be empty"));
            }
            if self.llm.model.is_empty() {
                errors.push(ConfigError::error("llm.model", "model must not be empty"));
            }
            if std::env::var(&self.llm.api_key_env).map_or(true, |v| v.is_empty()) {
                errors.push(ConfigError::warning(
                    "llm.api_key_env",
                    format!("environment variable {} is not set", self.llm.api_key_env),
                ));
            }
        }
        if self.llm.summary.every_turns == 0 {
            errors.push(ConfigError::warning(
                "llm.summary.every_turns",
                "every_turns 0 regenerates the summary on every turn",
            ));
        }

        if self.storage.backend == StorageBackend::Jsonl
            && self.storage.path.as_os_str().is_empty()
        {
            errors.push(ConfigError::error(
                "storage.path",
                "path must not be empty for the jsonl backend",
            ));
        }

        if self.sessions.default_name.trim().is_empty() {
            errors.push(ConfigError::warning(
                "sessions.default_name",
                "new sessions will have an empty name",
            ));
        }

        if self.sessions.max_page_size == 0 {
            errors.push(ConfigError::error(
                "sessions.max_page_size",
                "max_page_size must be at least 1",
            ));
        }
        if self.sessions.chat_name.max_words == 0 || self.sessions.chat_name.max_length == 0 {
            errors.push(ConfigError::error(
                "sessions.chat_name",
                "max_words and max_length must be at least 1",
            ));
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}

fn toml_from_str(raw: &str) -> crate::Result<Config> {
    toml::from_str(raw).map_err(|e| crate::Error::Config(e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
