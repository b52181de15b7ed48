pub mod naming;
pub mod openai_compat;
pub mod scripted;
pub mod summarize;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

use std::sync::Arc;

use tl_domain::config::{LlmConfig, ProviderKind};
use tl_domain::error::Result;

// Re-exports for convenience.
pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptStep, ScriptedProvider, SummaryStep};
pub use traits::{
    ChatNameRequest, LlmProvider, ResponseRequest, ResponseStatus, SummaryRequest, TurnCounters,
};

/// Build the provider selected by `llm.kind`.
pub fn build_provider(cfg: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match cfg.kind {
        ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::from_config(cfg)?),
        ProviderKind::Scripted => Arc::new(ScriptedProvider::new()),
    };
    tracing::info!(provider = provider.provider_id(), model = %cfg.model, "llm provider ready");
    Ok(provider)
}
