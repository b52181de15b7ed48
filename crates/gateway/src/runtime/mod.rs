//! Core runtime: context assembly, the turn engine, the persistence
//! barrier and the runner that exposes turns as plain or streamed results.
//!
//! Entry point: [`Runner`]. `run` returns a [`RunOutput`]; `run_stream`
//! returns an SSE-framed event stream plus a [`PendingRun`] future.

pub mod agent;
pub mod cancel;
pub mod context;
pub mod naming;
pub mod persist;
pub mod runner;
pub mod sse;
#[cfg(test)]
pub(crate) mod testing;
pub mod turn;

pub use agent::Agent;
pub use cancel::{CancelMap, CancelToken};
pub use context::{assemble_window, ContextWindow, SessionManager, TurnState};
pub use naming::{generate_chat_name, owned_session};
pub use persist::{PersistJob, Persisted};
pub use runner::{PendingRun, RunOutput, Runner};
pub use turn::{QueryResult, TurnEngine};
