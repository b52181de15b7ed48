use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which provider adapter to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any endpoint speaking the OpenAI chat-completions protocol.
    #[default]
    OpenaiCompat,
    /// Deterministic scripted replies (offline runs and tests).
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub chat_name: ChatNameConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: d_base_url(),
            model: d_model(),
            api_key_env: d_api_key_env(),
            temperature: None,
            timeout_secs: d_timeout_secs(),
            summary: SummaryConfig::default(),
            chat_name: ChatNameConfig::default(),
        }
    }
}

/// Rolling-summary regeneration policy. Owned by the provider; the turn
/// engine only reacts to whether a summary comes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Model used for summaries. Falls back to `llm.model` when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Regenerate after this many turns past the last summary.
    #[serde(default = "d_every_turns")]
    pub every_turns: u32,
    /// Regenerate once the post-summary tail reaches this many tokens.
    #[serde(default = "d_token_threshold")]
    pub token_threshold: u32,
    #[serde(default = "d_summary_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            model: None,
            every_turns: d_every_turns(),
            token_threshold: d_token_threshold(),
            max_tokens: d_summary_max_tokens(),
        }
    }
}

/// Model settings for chat-name generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatNameConfig {
    /// Falls back to `llm.model` when unset.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_chat_name_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ChatNameConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: d_chat_name_max_tokens(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn d_timeout_secs() -> u64 {
    120
}
fn d_every_turns() -> u32 {
    6
}
fn d_token_threshold() -> u32 {
    8_000
}
fn d_summary_max_tokens() -> u32 {
    1_024
}
fn d_chat_name_max_tokens() -> u32 {
    32
}
