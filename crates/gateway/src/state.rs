use std::sync::Arc;

use tl_domain::config::Config;
use tl_providers::LlmProvider;
use tl_sessions::PersistenceGateway;

use crate::runtime::cancel::CancelMap;
use crate::runtime::Runner;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub store: Arc<dyn PersistenceGateway>,
    /// Running streamed turns, keyed by session id.
    pub cancel_map: Arc<CancelMap>,
    pub runner: Runner,
}
