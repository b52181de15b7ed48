//! The turn engine: one user query in, one query/reply pair out.
//!
//! ```text
//! AWAITING_CONTEXT ─► GENERATING ─┬─► TOOL_CONTINUE ─► GENERATING ...
//!                                 ├─► TURN_COMPLETE
//!                                 ├─► CANCELLED   (partial reply kept)
//!                                 └─► FALLBACK    (fixed apology)
//! ```
//!
//! Every generation step runs the response generator and the summarizer
//! concurrently and waits for both. Failures are classified into a
//! [`TurnFailure`] and converted to a [`QueryResult`] at the top of
//! [`TurnEngine::handle_query`]; only identity errors escape.

use std::sync::Arc;

use tracing::Instrument;

use tl_domain::error::{Error, Result};
use tl_domain::message::{Message, FALLBACK_REPLY};
use tl_domain::query::MessageQuery;
use tl_domain::stream::StreamSink;
use tl_domain::summary::{CarriedSummary, GeneratedSummary};
use tl_domain::trace::TraceEvent;
use tl_providers::{ResponseRequest, ResponseStatus, SummaryRequest};

use super::agent::Agent;
use super::cancel::CancelToken;
use super::context::SessionManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one processed query, handed to the persistence barrier.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// The human query and the AI reply (or the fallback reply).
    pub messages: Vec<Message>,
    /// Summary to carry forward.
    pub summary: Option<CarriedSummary>,
    pub fallback: bool,
    /// True when `summary` is freshly generated and still needs writing.
    pub regenerated_summary: bool,
    /// True when the turn stopped early on a cancel request.
    pub cancelled: bool,
}

/// Why the generation loop stopped without completing the turn.
#[derive(Debug, thiserror::Error)]
enum TurnFailure {
    /// The request itself is invalid. Propagated unchanged.
    #[error(transparent)]
    Identity(Error),
    #[error("agent exceeded maximum number of steps allowed (current step: {current}, max steps: {max})")]
    StepLimit { current: u32, max: u32 },
    #[error(transparent)]
    Generation(Error),
    #[error("cancelled")]
    Cancelled,
}

impl From<Error> for TurnFailure {
    fn from(e: Error) -> Self {
        match e {
            e if e.is_identity() => TurnFailure::Identity(e),
            Error::StepLimitExceeded { current, max } => TurnFailure::StepLimit { current, max },
            Error::Cancelled => TurnFailure::Cancelled,
            e => TurnFailure::Generation(e),
        }
    }
}

/// What the loop has produced so far.
struct TurnDraft {
    query: Message,
    reply: Message,
    /// The summary the context was assembled with.
    summary: Option<CarriedSummary>,
    /// Last summary the provider returned during this turn.
    regenerated: Option<GeneratedSummary>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEngine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnEngine {
    agent: Arc<Agent>,
    session: SessionManager,
}

impl TurnEngine {
    pub fn new(agent: Arc<Agent>, session: SessionManager) -> Self {
        Self { agent, session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn turn_number(&self) -> u32 {
        self.session.state.turn_number
    }

    /// Process one query. Generation failures and the step ceiling become a
    /// fallback result and a cancel request becomes a partial result, so
    /// the only errors returned are identity errors.
    pub async fn handle_query(
        &mut self,
        query: &MessageQuery,
        sink: Option<&StreamSink>,
        cancel: &CancelToken,
    ) -> Result<QueryResult> {
        let mut draft = TurnDraft {
            query: Message::human(query.id.clone(), &query.query),
            reply: Message::ai(),
            summary: None,
            regenerated: None,
        };

        let outcome = self.run_loop(&mut draft, sink, cancel).await;
        let session_id = self.session.session_id().to_owned();
        let turn_number = self.session.state.turn_number;

        match outcome {
            Ok(()) => {
                let regenerated_summary = draft.regenerated.is_some();
                let summary = match draft.regenerated {
                    Some(fresh) => Some(CarriedSummary::Fresh(fresh)),
                    None => draft.summary,
                };
                TraceEvent::TurnCompleted {
                    session_id,
                    turn_number,
                    steps: self.session.state.step,
                    regenerated_summary,
                }
                .emit();
                Ok(QueryResult {
                    messages: vec![draft.query, draft.reply],
                    summary,
                    fallback: false,
                    regenerated_summary,
                    cancelled: false,
                })
            }
            Err(TurnFailure::Cancelled) => {
                tracing::info!("turn cancelled, keeping partial reply");
                TraceEvent::TurnCancelled {
                    session_id,
                    turn_number,
                    partial_parts: draft.reply.parts.len(),
                }
                .emit();
                Ok(QueryResult {
                    messages: vec![draft.query, draft.reply],
                    summary: draft.summary,
                    fallback: false,
                    regenerated_summary: false,
                    cancelled: true,
                })
            }
            Err(TurnFailure::Identity(e)) => {
                tracing::warn!(error = %e, "turn rejected");
                Err(e)
            }
            Err(failure) => {
                tracing::error!(error = %failure, "turn failed, answering with fallback");
                TraceEvent::TurnFallback {
                    session_id,
                    turn_number,
                    reason: failure.to_string(),
                }
                .emit();

                let reply = Message::fallback_reply();
                if let Some(sink) = sink {
                    sink.emit_text_block(&reply.id, FALLBACK_REPLY);
                }
                let summary = match draft.summary {
                    Some(summary) => Some(summary),
                    None => self
                        .session
                        .latest_summary_for_fallback()
                        .await
                        .map(CarriedSummary::Stored),
                };
                Ok(QueryResult {
                    messages: vec![draft.query, reply],
                    summary,
                    fallback: true,
                    regenerated_summary: false,
                    cancelled: false,
                })
            }
        }
    }

    async fn run_loop(
        &mut self,
        draft: &mut TurnDraft,
        sink: Option<&StreamSink>,
        cancel: &CancelToken,
    ) -> std::result::Result<(), TurnFailure> {
        let provider = self.agent.provider.clone();
        let mut request = ResponseRequest {
            history: Vec::new(),
            tools: self.agent.tools.clone(),
        };
        let mut prior_conversation = Vec::new();
        let mut tool_call = false;

        loop {
            if !tool_call {
                let window = self.session.assemble_context().await?;
                draft.summary = self
                    .session
                    .state
                    .active_summary
                    .clone()
                    .map(CarriedSummary::Stored);

                let system = provider.build_system_message(
                    &self.agent.instructions,
                    draft.summary.as_ref().map(CarriedSummary::content),
                );
                request.history = std::iter::once(system)
                    .chain(window.iter().cloned())
                    .chain(std::iter::once(draft.query.clone()))
                    .collect();
                prior_conversation = window;
            }

            let summary_request = SummaryRequest {
                prior_conversation: prior_conversation.clone(),
                previous_summary: draft.summary.clone(),
                query: draft.query.text(),
                counters: self.session.counters(),
                tool_call,
                new_chat: self.session.is_new_chat(),
            };

            let span = tracing::info_span!(
                "llm.generate",
                provider = provider.provider_id(),
                step = self.session.state.step,
                tool_call,
            );
            let generation = async {
                tokio::join!(
                    provider.generate_response(&request, &mut draft.reply, sink),
                    provider.generate_summary(&summary_request),
                )
            }
            .instrument(span);

            let (response, summary) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TurnFailure::Cancelled),
                settled = generation => settled,
            };

            // Both calls have settled; the response error takes precedence.
            let status = response?;
            if let Some(fresh) = summary? {
                tracing::debug!(
                    start = fresh.start_turn_number,
                    end = fresh.end_turn_number,
                    "summary regenerated"
                );
                draft.regenerated = Some(fresh);
            }

            match status {
                ResponseStatus::Complete => return Ok(()),
                ResponseStatus::ToolCall => {
                    tool_call = true;
                    self.session.state.step += 1;
                    let current = self.session.state.step;
                    let max = self.agent.max_steps;
                    if current > max {
                        return Err(TurnFailure::StepLimit { current, max });
                    }
                    tracing::debug!(step = current, "tool call requested, continuing turn");
                }
            }
        }
    }
}
