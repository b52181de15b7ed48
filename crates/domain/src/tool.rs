use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// An executable tool. Implementations live outside the runtime; providers
/// call them when the model requests a tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, input: Value) -> crate::Result<Value>;
}
