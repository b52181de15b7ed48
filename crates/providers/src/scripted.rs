//! Deterministic provider driven by a queue of scripted steps.
//!
//! Used for offline runs (`llm.kind = "scripted"`) and as the test double
//! for the runtime. Every call pops the next step; an empty queue answers
//! with a short canned reply. The summary queue is popped on every call,
//! tool-call continuations included, so tests can script any sequence.
//! Chat names come from their own queue, falling back to the opening words
//! of the query.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::naming::clean_chat_name;
use crate::traits::{
    summary_range, ChatNameRequest, LlmProvider, ResponseRequest, ResponseStatus, SummaryRequest,
};
use tl_domain::error::{Error, Result};
use tl_domain::message::{estimate_tokens, Message};
use tl_domain::stream::{StreamEvent, StreamSink};
use tl_domain::summary::GeneratedSummary;

const CANNED_REPLY: &str = "This is a scripted reply.";

/// One scripted response step.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Stream `text` and complete the turn.
    Text(String),
    /// Request a tool call whose output is already known.
    ToolCall {
        name: String,
        input: Value,
        output: Value,
    },
    /// Fail with a provider error.
    Fail(String),
    /// Stream `text`, then never return.
    PartialThenHang(String),
    /// Wait, then run the inner step.
    Delayed(Duration, Box<ScriptStep>),
}

/// One scripted summarizer outcome.
#[derive(Debug, Clone)]
pub enum SummaryStep {
    /// Keep the current summary.
    Keep,
    Summary(String),
    Fail(String),
    /// Never return.
    Hang,
}

/// Provider that replays [`ScriptStep`]s and [`SummaryStep`]s in order.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    summaries: Mutex<VecDeque<SummaryStep>>,
    names: Mutex<VecDeque<String>>,
    last_chat_name_request: Mutex<Option<ChatNameRequest>>,
    response_calls: AtomicU32,
    summary_calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let provider = Self::new();
        provider.steps.lock().extend(steps);
        provider
    }

    pub fn push_step(&self, step: ScriptStep) {
        self.steps.lock().push_back(step);
    }

    pub fn push_summary(&self, step: SummaryStep) {
        self.summaries.lock().push_back(step);
    }

    pub fn push_chat_name(&self, raw: impl Into<String>) {
        self.names.lock().push_back(raw.into());
    }

    /// The most recent request passed to `generate_chat_name`.
    pub fn last_chat_name_request(&self) -> Option<ChatNameRequest> {
        self.last_chat_name_request.lock().clone()
    }

    pub fn response_calls(&self) -> u32 {
        self.response_calls.load(Ordering::SeqCst)
    }

    pub fn summary_calls(&self) -> u32 {
        self.summary_calls.load(Ordering::SeqCst)
    }

    fn stream_text(ai_message: &mut Message, sink: Option<&StreamSink>, text: &str) {
        let id = format!("{}-{}", ai_message.id, ai_message.parts.len());
        if let Some(sink) = sink {
            sink.emit(StreamEvent::TextStart { id: id.clone() });
        }
        // Word-sized deltas so partial output is observable.
        for piece in text.split_inclusive(' ') {
            ai_message.push_text(piece);
            if let Some(sink) = sink {
                sink.emit(StreamEvent::TextDelta {
                    id: id.clone(),
                    delta: piece.to_string(),
                });
            }
        }
        ai_message.token_count = ai_message.token_count.saturating_add(estimate_tokens(text));
        if let Some(sink) = sink {
            sink.emit(StreamEvent::TextEnd { id });
        }
    }

    async fn play(
        &self,
        step: ScriptStep,
        ai_message: &mut Message,
        sink: Option<&StreamSink>,
    ) -> Result<ResponseStatus> {
        let mut step = step;
        while let ScriptStep::Delayed(delay, inner) = step {
            tokio::time::sleep(delay).await;
            step = *inner;
        }

        match step {
            ScriptStep::Text(text) => {
                Self::stream_text(ai_message, sink, &text);
                Ok(ResponseStatus::Complete)
            }
            ScriptStep::ToolCall {
                name,
                input,
                output,
            } => {
                let call_id = format!("call_{}", ai_message.parts.len());
                if let Some(sink) = sink {
                    sink.emit(StreamEvent::ToolInputAvailable {
                        tool_call_id: call_id.clone(),
                        tool_name: name.clone(),
                        input: input.clone(),
                    });
                }
                ai_message.push_tool_call(&call_id, &name, input);
                if let Some(sink) = sink {
                    sink.emit(StreamEvent::ToolOutputAvailable {
                        tool_call_id: call_id.clone(),
                        output: output.clone(),
                    });
                }
                ai_message.set_tool_output(&call_id, output, false);
                Ok(ResponseStatus::ToolCall)
            }
            ScriptStep::Fail(message) => Err(Error::Provider {
                provider: "scripted".into(),
                message,
            }),
            ScriptStep::PartialThenHang(text) => {
                Self::stream_text(ai_message, sink, &text);
                std::future::pending::<()>().await;
                Ok(ResponseStatus::Complete)
            }
            ScriptStep::Delayed(..) => Ok(ResponseStatus::Complete),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate_response(
        &self,
        _req: &ResponseRequest,
        ai_message: &mut Message,
        sink: Option<&StreamSink>,
    ) -> Result<ResponseStatus> {
        self.response_calls.fetch_add(1, Ordering::SeqCst);
        if let (Some(sink), true) = (sink, ai_message.parts.is_empty()) {
            sink.emit(StreamEvent::Start {
                message_id: ai_message.id.clone(),
            });
        }

        let step = self.steps.lock().pop_front();
        let step = step.unwrap_or_else(|| ScriptStep::Text(CANNED_REPLY.into()));
        self.play(step, ai_message, sink).await
    }

    async fn generate_summary(&self, req: &SummaryRequest) -> Result<Option<GeneratedSummary>> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.summaries.lock().pop_front();
        match step.unwrap_or(SummaryStep::Keep) {
            SummaryStep::Keep => Ok(None),
            SummaryStep::Summary(content) => {
                let (start_turn_number, end_turn_number) = summary_range(req);
                Ok(Some(GeneratedSummary {
                    token_count: estimate_tokens(&content),
                    content,
                    start_turn_number,
                    end_turn_number,
                }))
            }
            SummaryStep::Fail(message) => Err(Error::Provider {
                provider: "scripted".into(),
                message,
            }),
            SummaryStep::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn generate_chat_name(&self, req: &ChatNameRequest) -> Result<String> {
        *self.last_chat_name_request.lock() = Some(req.clone());
        let scripted = self.names.lock().pop_front();
        let raw = scripted.unwrap_or_else(|| req.query.clone());
        clean_chat_name(&raw, req.max_words, req.max_length).ok_or_else(|| Error::Provider {
            provider: "scripted".into(),
            message: "empty chat name".into(),
        })
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_domain::stream::Envelope;

    #[tokio::test]
    async fn text_step_streams_and_completes() {
        let provider = ScriptedProvider::with_steps([ScriptStep::Text("hello there".into())]);
        let (sink, mut rx) = StreamSink::channel();
        let mut ai = Message::ai();

        let status = provider
            .generate_response(&ResponseRequest::default(), &mut ai, Some(&sink))
            .await
            .unwrap();

        assert_eq!(status, ResponseStatus::Complete);
        assert_eq!(ai.text(), "hello there");
        assert!(matches!(
            rx.recv().await,
            Some(Envelope::Event(StreamEvent::Start { .. }))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(Envelope::Event(StreamEvent::TextStart { .. }))
        ));
        assert_eq!(provider.response_calls(), 1);
    }

    #[tokio::test]
    async fn tool_step_records_output() {
        let provider = ScriptedProvider::with_steps([ScriptStep::ToolCall {
            name: "clock".into(),
            input: serde_json::json!({}),
            output: serde_json::json!("noon"),
        }]);
        let mut ai = Message::ai();
        let status = provider
            .generate_response(&ResponseRequest::default(), &mut ai, None)
            .await
            .unwrap();
        assert_eq!(status, ResponseStatus::ToolCall);
        assert_eq!(ai.pending_tool_calls().count(), 0);
        assert_eq!(ai.parts.len(), 1);
    }

    #[tokio::test]
    async fn empty_queue_gives_canned_reply() {
        let provider = ScriptedProvider::new();
        let mut ai = Message::ai();
        provider
            .generate_response(&ResponseRequest::default(), &mut ai, None)
            .await
            .unwrap();
        assert_eq!(ai.text(), CANNED_REPLY);
    }

    #[tokio::test]
    async fn partial_then_hang_keeps_partial_text() {
        let provider = ScriptedProvider::with_steps([ScriptStep::PartialThenHang("part".into())]);
        let mut ai = Message::ai();
        let res = tokio::time::timeout(
            Duration::from_millis(50),
            provider.generate_response(&ResponseRequest::default(), &mut ai, None),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(ai.text(), "part");
    }

    #[tokio::test]
    async fn summary_steps_replay_in_order() {
        let provider = ScriptedProvider::new();
        provider.push_summary(SummaryStep::Summary("recap".into()));
        let req = SummaryRequest {
            prior_conversation: vec![],
            previous_summary: None,
            query: "q".into(),
            counters: Default::default(),
            tool_call: false,
            new_chat: true,
        };
        let first = provider.generate_summary(&req).await.unwrap();
        assert_eq!(first.unwrap().content, "recap");
        assert!(provider.generate_summary(&req).await.unwrap().is_none());
        assert_eq!(provider.summary_calls(), 2);
    }

    #[tokio::test]
    async fn summary_queue_is_consumed_on_tool_call_steps_too() {
        let provider = ScriptedProvider::new();
        provider.push_summary(SummaryStep::Summary("mid-tool".into()));
        let req = SummaryRequest {
            prior_conversation: vec![],
            previous_summary: None,
            query: "q".into(),
            counters: Default::default(),
            tool_call: true,
            new_chat: false,
        };
        let out = provider.generate_summary(&req).await.unwrap();
        assert_eq!(out.unwrap().content, "mid-tool");
    }

    #[tokio::test]
    async fn chat_name_prefers_queue_then_query() {
        let provider = ScriptedProvider::new();
        provider.push_chat_name("\"Trip Planning\"");
        let req = ChatNameRequest {
            query: "what should I pack for a week in Lisbon".into(),
            max_words: 3,
            max_length: 50,
            ..ChatNameRequest::default()
        };

        assert_eq!(provider.generate_chat_name(&req).await.unwrap(), "Trip Planning");
        assert_eq!(
            provider.generate_chat_name(&req).await.unwrap(),
            "what should I"
        );
        assert_eq!(
            provider.last_chat_name_request().unwrap().query,
            req.query
        );

        let blank = ChatNameRequest {
            query: "   ".into(),
            max_words: 3,
            max_length: 50,
            ..ChatNameRequest::default()
        };
        assert!(provider.generate_chat_name(&blank).await.is_err());
    }
}
