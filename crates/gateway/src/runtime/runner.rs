//! Runner: drives a turn end to end and exposes it as a plain result or
//! as an event stream plus a result future.
//!
//! A streamed run executes on its own task. The event stream and the result
//! future are independent consumers of it; dropping the stream (client
//! disconnect) does not stop the turn or lose its result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::Instrument;

use tl_domain::config::Config;
use tl_domain::config::ContextConfig;
use tl_domain::error::{Error, Result};
use tl_domain::message::Message;
use tl_domain::stream::{Envelope, StreamEvent, StreamSink};
use tl_domain::summary::CarriedSummary;
use tl_domain::query::TurnRequest;
use tl_sessions::PersistenceGateway;

use super::agent::Agent;
use super::cancel::{CancelMap, CancelToken};
use super::context::SessionManager;
use super::persist::PersistJob;
use super::sse::{format_sse_done, format_sse_event};
use super::turn::TurnEngine;

/// The structured result of a run. Carries only public message and
/// summary fields.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub messages: Vec<Message>,
    pub summary: Option<CarriedSummary>,
    pub session_id: String,
}

/// Resolves to a streamed run's result once persistence has finished.
pub struct PendingRun {
    rx: oneshot::Receiver<Result<RunOutput>>,
}

impl Future for PendingRun {
    type Output = Result<RunOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::Other("turn task ended without a result".into())))
        })
    }
}

#[derive(Clone)]
pub struct Runner {
    agent: Arc<Agent>,
    store: Arc<dyn PersistenceGateway>,
    cancel_map: Arc<CancelMap>,
    context: ContextConfig,
    default_name: String,
}

impl Runner {
    pub fn new(
        agent: Arc<Agent>,
        store: Arc<dyn PersistenceGateway>,
        cancel_map: Arc<CancelMap>,
    ) -> Self {
        Self {
            agent,
            store,
            cancel_map,
            context: ContextConfig::default(),
            default_name: tl_domain::config::SessionsConfig::default().default_name,
        }
    }

    pub fn from_config(
        config: &Config,
        agent: Arc<Agent>,
        store: Arc<dyn PersistenceGateway>,
        cancel_map: Arc<CancelMap>,
    ) -> Self {
        Self::new(agent, store, cancel_map)
            .with_context(config.context.clone())
            .with_default_name(config.sessions.default_name.clone())
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    pub fn cancel_map(&self) -> &Arc<CancelMap> {
        &self.cancel_map
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Run one turn without streaming.
    pub async fn run(&self, request: TurnRequest) -> Result<RunOutput> {
        let session_id = session_id_for(&request);
        self.execute(session_id, request, None, CancelToken::new())
            .await
    }

    /// Run one turn on a background task. Returns the SSE-framed event
    /// stream (always terminated by `data: [DONE]`) and the result future.
    pub fn run_stream(
        &self,
        request: TurnRequest,
    ) -> (impl Stream<Item = String> + Send + 'static, PendingRun) {
        let session_id = session_id_for(&request);
        let (sink, mut rx) = StreamSink::channel();
        let (result_tx, result_rx) = oneshot::channel();
        let token = self.cancel_map.register(&session_id);
        let runner = self.clone();

        tokio::spawn(async move {
            let provider_sink = runner.agent.stream.then(|| sink.clone());
            let outcome = runner
                .execute(session_id.clone(), request, provider_sink, token.clone())
                .await;
            runner.cancel_map.remove(&session_id, &token);

            match &outcome {
                Ok(output) => match serde_json::to_value(output) {
                    Ok(data) => sink.emit(StreamEvent::DataSession { data }),
                    Err(e) => sink.emit(StreamEvent::Error {
                        error_text: e.to_string(),
                    }),
                },
                Err(Error::Cancelled) => sink.emit(StreamEvent::cancelled()),
                Err(e) => sink.emit(StreamEvent::Error {
                    error_text: e.to_string(),
                }),
            }
            sink.close();
            // The caller may have dropped the future.
            let _ = result_tx.send(outcome);
        });

        let events = async_stream::stream! {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Event(event) => yield format_sse_event(&event),
                    Envelope::End => break,
                }
            }
            yield format_sse_done();
        };

        (events, PendingRun { rx: result_rx })
    }

    async fn execute(
        &self,
        session_id: String,
        request: TurnRequest,
        sink: Option<StreamSink>,
        cancel: CancelToken,
    ) -> Result<RunOutput> {
        let span = tracing::info_span!(
            "turn",
            session_id = %session_id,
            turn_number = tracing::field::Empty,
            agent = %self.agent.name,
        );

        async move {
            tracing::debug!("turn started");
            let manager = SessionManager::new(
                self.store.clone(),
                session_id.clone(),
                request.client_id.clone(),
                request.is_new_chat(),
            )
            .with_context(self.context.clone())
            .with_default_name(self.default_name.clone());
            let mut engine = TurnEngine::new(self.agent.clone(), manager);

            let result = engine
                .handle_query(&request.message, sink.as_ref(), &cancel)
                .await?;
            let cancel_consumed = result.cancelled;

            // Nothing to write into when the session never resolved.
            if engine.session().session().is_none() {
                tracing::warn!("session unresolved, turn not persisted");
                let turn_number = engine.turn_number();
                let mut messages = result.messages;
                for message in &mut messages {
                    message.turn_number = turn_number;
                }
                if let Some(sink) = &sink {
                    sink.emit(StreamEvent::finish_stop());
                }
                return Ok(RunOutput {
                    messages,
                    summary: result.summary,
                    session_id,
                });
            }

            let mut write = PersistJob {
                store: self.store.clone(),
                session_id: session_id.clone(),
                turn_number: engine.turn_number(),
                result,
                sink: sink.clone(),
            }
            .spawn();

            let joined = if cancel_consumed {
                write.await
            } else {
                tokio::select! {
                    biased;
                    joined = &mut write => joined,
                    _ = cancel.cancelled() => {
                        tracing::info!("cancelled while persisting, write continues in background");
                        return Err(Error::Cancelled);
                    }
                }
            };
            let persisted =
                joined.map_err(|e| Error::Other(format!("persistence task failed: {e}")))??;

            if let Some(sink) = &sink {
                sink.emit(StreamEvent::finish_stop());
            }

            Ok(RunOutput {
                messages: persisted.messages,
                summary: persisted.summary,
                session_id,
            })
        }
        .instrument(span)
        .await
    }
}

/// The request's session id, or a freshly minted one for a new chat.
fn session_id_for(request: &TurnRequest) -> String {
    request
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
