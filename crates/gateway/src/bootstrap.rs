//! AppState construction shared by `serve` and `run`, so both boot the same
//! runtime with or without an HTTP listener.

use std::sync::Arc;

use anyhow::Context;

use tl_domain::config::{Config, ConfigSeverity};
use tl_providers::build_provider;
use tl_sessions::open_store;

use crate::runtime::cancel::CancelMap;
use crate::runtime::{Agent, Runner};
use crate::state::AppState;

/// Validate config, open the store, build the provider and return a
/// fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Persistence ──────────────────────────────────────────────────
    let store = open_store(&config.storage)
        .await
        .context("opening persistence gateway")?;

    // ── LLM provider ─────────────────────────────────────────────────
    let provider = build_provider(&config.llm).context("initializing LLM provider")?;

    // ── Runtime ──────────────────────────────────────────────────────
    let agent = Arc::new(Agent::from_config(&config.agent, provider.clone()));
    let cancel_map = Arc::new(CancelMap::new());
    let runner = Runner::from_config(&config, agent, store.clone(), cancel_map.clone());
    tracing::info!(
        agent = %config.agent.name,
        max_steps = config.agent.max_steps,
        "runtime ready"
    );

    Ok(AppState {
        config,
        provider,
        store,
        cancel_map,
        runner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_domain::config::{ProviderKind, StorageBackend};
    use tl_domain::query::TurnRequest;

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.llm.kind = ProviderKind::Scripted;
        config.storage.backend = StorageBackend::Memory;
        config
    }

    #[tokio::test]
    async fn offline_config_boots_and_runs_a_turn() {
        let state = build_app_state(Arc::new(offline_config())).await.unwrap();
        assert_eq!(state.provider.provider_id(), "scripted");

        let output = state
            .runner
            .run(TurnRequest::new("client-1", "hello"))
            .await
            .unwrap();
        assert_eq!(output.messages.len(), 2);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = offline_config();
        config.agent.max_steps = 0;
        let err = build_app_state(Arc::new(config)).await.err().unwrap();
        assert!(err.to_string().contains("config validation failed"));
    }
}
