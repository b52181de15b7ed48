use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Older (pre-summary) messages are pulled into the window until the
    /// window reaches this many tokens.
    #[serde(default = "d_50000")]
    pub max_token_threshold: u32,
    /// How many recent turns to read per assembly.
    #[serde(default = "d_100")]
    pub max_turns_to_fetch: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_token_threshold: 50_000,
            max_turns_to_fetch: 100,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_50000() -> u32 {
    50_000
}
fn d_100() -> u32 {
    100
}
