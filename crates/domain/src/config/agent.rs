use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_name")]
    pub name: String,
    /// Instructions placed at the head of every prompt.
    #[serde(default = "d_instructions")]
    pub instructions: String,
    /// Tool-call sub-iterations allowed per turn.
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    /// Stream provider output to the caller.
    #[serde(default = "d_true")]
    pub stream: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: d_name(),
            instructions: d_instructions(),
            max_steps: d_max_steps(),
            stream: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_name() -> String {
    "assistant".into()
}
fn d_instructions() -> String {
    "You are a helpful assistant.".into()
}
fn d_max_steps() -> u32 {
    10
}
fn d_true() -> bool {
    true
}
