use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Display name given to newly created sessions.
    #[serde(default = "d_default_name")]
    pub default_name: String,
    /// Page size used when a listing request does not name one.
    #[serde(default = "d_page_size")]
    pub page_size: u32,
    /// Upper bound for requested page sizes.
    #[serde(default = "d_max_page_size")]
    pub max_page_size: u32,
    #[serde(default)]
    pub chat_name: ChatNamingConfig,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_name: d_default_name(),
            page_size: d_page_size(),
            max_page_size: d_max_page_size(),
            chat_name: ChatNamingConfig::default(),
        }
    }
}

impl SessionsConfig {
    /// Resolve a requested page size against the configured default and cap.
    pub fn page_size_for(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// Chat-name generation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatNamingConfig {
    /// Recent turns of an existing session given to the namer as context.
    #[serde(default = "d_context_turns")]
    pub context_turns: u32,
    #[serde(default = "d_max_length")]
    pub max_length: usize,
    #[serde(default = "d_max_words")]
    pub max_words: usize,
}

impl Default for ChatNamingConfig {
    fn default() -> Self {
        Self {
            context_turns: d_context_turns(),
            max_length: d_max_length(),
            max_words: d_max_words(),
        }
    }
}

fn d_default_name() -> String {
    "New Chat".into()
}
fn d_page_size() -> u32 {
    20
}
fn d_max_page_size() -> u32 {
    100
}
fn d_context_turns() -> u32 {
    20
}
fn d_max_length() -> usize {
    50
}
fn d_max_words() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_defaulted_and_capped() {
        let cfg = SessionsConfig::default();
        assert_eq!(cfg.page_size_for(None), 20);
        assert_eq!(cfg.page_size_for(Some(0)), 1);
        assert_eq!(cfg.page_size_for(Some(5_000)), 100);
    }
}
