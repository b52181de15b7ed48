//! The persistence barrier: durably record a finished turn.
//!
//! The summary (when regenerated) is written before the messages so the
//! inserted messages can back-link it. If writing fails, the turn is
//! recorded as the query plus the fallback reply instead.
//!
//! The job runs on its own task. Dropping or cancelling the caller never
//! interrupts a write that has started.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use tl_domain::error::{Error, Result};
use tl_domain::message::{Message, FALLBACK_REPLY};
use tl_domain::stream::StreamSink;
use tl_domain::summary::{CarriedSummary, Summary};
use tl_domain::trace::TraceEvent;
use tl_sessions::PersistenceGateway;

use super::turn::QueryResult;

/// What was actually written.
#[derive(Debug, Clone)]
pub struct Persisted {
    pub messages: Vec<Message>,
    pub summary: Option<CarriedSummary>,
}

pub struct PersistJob {
    pub store: Arc<dyn PersistenceGateway>,
    pub session_id: String,
    pub turn_number: u32,
    pub result: QueryResult,
    /// Receives the fallback reply if the write has to be replaced.
    pub sink: Option<StreamSink>,
}

impl PersistJob {
    /// Run the job on its own task, in the current span.
    pub fn spawn(self) -> JoinHandle<Result<Persisted>> {
        tokio::spawn(self.run().instrument(tracing::Span::current()))
    }

    pub async fn run(self) -> Result<Persisted> {
        let PersistJob {
            store,
            session_id,
            turn_number,
            result,
            sink,
        } = self;
        let QueryResult {
            mut messages,
            summary,
            fallback,
            regenerated_summary,
            ..
        } = result;

        for message in &mut messages {
            message.turn_number = turn_number;
        }

        let mut written: Option<Summary> = None;
        let attempt = async {
            if let (true, Some(CarriedSummary::Fresh(fresh))) = (regenerated_summary, &summary) {
                let stored = store.create_summary(&session_id, fresh).await?;
                TraceEvent::SummaryPersisted {
                    session_id: session_id.clone(),
                    summary_id: stored.id.clone(),
                    end_turn_number: stored.end_turn_number,
                }
                .emit();
                written = Some(stored);
            }
            let backlink = written
                .as_ref()
                .map(|s| s.id.as_str())
                .or_else(|| summary.as_ref().and_then(CarriedSummary::id));
            store
                .insert_messages(&session_id, &messages, turn_number, backlink)
                .await
        }
        .await;

        let summary = match written {
            Some(stored) => Some(CarriedSummary::Stored(stored)),
            None => summary,
        };

        match attempt {
            Ok(()) => {
                TraceEvent::MessagesPersisted {
                    session_id,
                    turn_number,
                    count: messages.len(),
                    fallback,
                }
                .emit();
                Ok(Persisted { messages, summary })
            }
            Err(e) => {
                tracing::error!(error = %e, turn_number, "failed to persist turn, recording fallback");
                let Some(query) = messages.into_iter().next() else {
                    return Ok(Persisted {
                        messages: Vec::new(),
                        summary,
                    });
                };
                let mut reply = Message::fallback_reply();
                reply.turn_number = turn_number;
                if let Some(sink) = &sink {
                    sink.emit_text_block(&reply.id, FALLBACK_REPLY);
                }
                let messages = vec![query, reply];
                store
                    .insert_messages(
                        &session_id,
                        &messages,
                        turn_number,
                        summary.as_ref().and_then(CarriedSummary::id),
                    )
                    .await
                    .map_err(|retry| {
                        Error::Storage(format!("fallback write failed after {e}: {retry}"))
                    })?;
                TraceEvent::MessagesPersisted {
                    session_id,
                    turn_number,
                    count: messages.len(),
                    fallback: true,
                }
                .emit();
                Ok(Persisted { messages, summary })
            }
        }
    }
}
