//! The agent a turn runs as: instructions, tools, provider and step ceiling.

use std::sync::Arc;

use tl_domain::config::AgentConfig;
use tl_domain::tool::Tool;
use tl_providers::LlmProvider;

#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    /// Tool-call sub-iterations allowed per turn.
    pub max_steps: u32,
    /// Whether streamed runs forward provider events to the caller.
    pub stream: bool,
    pub tools: Vec<Arc<dyn Tool>>,
    pub provider: Arc<dyn LlmProvider>,
}

impl Agent {
    pub fn from_config(cfg: &AgentConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: cfg.name.clone(),
            instructions: cfg.instructions.clone(),
            max_steps: cfg.max_steps,
            stream: cfg.stream,
            tools: Vec::new(),
            provider,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("max_steps", &self.max_steps)
            .field("stream", &self.stream)
            .field("tools", &self.tools.len())
            .field("provider", &self.provider.provider_id())
            .finish()
    }
}
