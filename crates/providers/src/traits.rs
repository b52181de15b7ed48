use std::sync::Arc;

use tl_domain::error::Result;
use tl_domain::message::Message;
use tl_domain::stream::StreamSink;
use tl_domain::summary::{CarriedSummary, GeneratedSummary};
use tl_domain::tool::Tool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input for one response-generation step.
///
/// `history` is the instruction message, the context window and the user
/// query. On tool-call continuations the AI message being built is passed
/// separately and providers send it after `history`.
#[derive(Clone, Default)]
pub struct ResponseRequest {
    pub history: Vec<Message>,
    pub tools: Vec<Arc<dyn Tool>>,
}

/// Session counters handed to the summarizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnCounters {
    /// The turn being produced.
    pub turn_number: u32,
    pub turns_after_last_summary: u32,
    pub total_token_after_last_summary: u32,
}

/// Input for the rolling summarizer.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    /// Context window for this turn, without the query or tool traffic.
    pub prior_conversation: Vec<Message>,
    pub previous_summary: Option<CarriedSummary>,
    pub query: String,
    pub counters: TurnCounters,
    /// True on tool-call continuation steps.
    pub tool_call: bool,
    pub new_chat: bool,
}

/// Input for chat-name generation.
#[derive(Debug, Clone, Default)]
pub struct ChatNameRequest {
    pub query: String,
    /// Recent messages of an existing chat, chronological. Empty for a
    /// brand-new chat.
    pub conversation: Vec<Message>,
    pub previous_summary: Option<String>,
    pub max_words: usize,
    pub max_length: usize,
}

/// How a response step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Tools were called and their outputs recorded; generate again.
    ToolCall,
    /// The reply is final for this turn.
    Complete,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Both generation methods take shared inputs by reference and may run
/// concurrently for the same turn.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate (part of) the AI reply into `ai_message`.
    ///
    /// Parts are appended as they arrive so partial output survives if the
    /// caller stops polling. Events go to `sink` when one is given.
    async fn generate_response(
        &self,
        req: &ResponseRequest,
        ai_message: &mut Message,
        sink: Option<&StreamSink>,
    ) -> Result<ResponseStatus>;

    /// Produce a new rolling summary, or `None` to keep the current one.
    /// Whether to regenerate is this provider's decision.
    async fn generate_summary(&self, req: &SummaryRequest) -> Result<Option<GeneratedSummary>>;

    /// Produce a short display name for a chat, already clipped to the
    /// request's word and length limits.
    async fn generate_chat_name(&self, req: &ChatNameRequest) -> Result<String>;

    /// Build the instruction message placed at the head of the prompt.
    fn build_system_message(&self, instructions: &str, summary: Option<&str>) -> Message {
        match summary {
            Some(text) if !text.trim().is_empty() => Message::system(format!(
                "{instructions}\n\n## Summary of earlier conversation\n{text}"
            )),
            _ => Message::system(instructions),
        }
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Turn range a regenerated summary covers: everything before the current
/// turn, starting where the previous summary (or the window) started.
pub fn summary_range(req: &SummaryRequest) -> (u32, u32) {
    let end = req.counters.turn_number.saturating_sub(1);
    let start = match &req.previous_summary {
        Some(CarriedSummary::Stored(s)) => s.start_turn_number,
        Some(CarriedSummary::Fresh(g)) => g.start_turn_number,
        None => req
            .prior_conversation
            .first()
            .map(|m| m.turn_number)
            .unwrap_or(1),
    };
    (start.min(end).max(1), end)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait::async_trait]
    impl LlmProvider for Bare {
        async fn generate_response(
            &self,
            _req: &ResponseRequest,
            _ai: &mut Message,
            _sink: Option<&StreamSink>,
        ) -> Result<ResponseStatus> {
            Ok(ResponseStatus::Complete)
        }

        async fn generate_summary(&self, _req: &SummaryRequest) -> Result<Option<GeneratedSummary>> {
            Ok(None)
        }

        async fn generate_chat_name(&self, _req: &ChatNameRequest) -> Result<String> {
            Ok("Bare".into())
        }

        fn provider_id(&self) -> &str {
            "bare"
        }
    }

    #[test]
    fn system_message_appends_summary_section() {
        let msg = Bare.build_system_message("Be brief.", Some("User likes Rust."));
        assert!(msg.is_system());
        let text = msg.text();
        assert!(text.starts_with("Be brief."));
        assert!(text.contains("Summary of earlier conversation"));
        assert!(text.ends_with("User likes Rust."));
    }

    #[test]
    fn system_message_without_summary_is_instructions_only() {
        assert_eq!(Bare.build_system_message("Be brief.", None).text(), "Be brief.");
        assert_eq!(Bare.build_system_message("Be brief.", Some("  ")).text(), "Be brief.");
    }

    #[test]
    fn summary_range_ends_before_current_turn() {
        let mut earlier = Message::human(None, "hi");
        earlier.turn_number = 3;
        let req = SummaryRequest {
            prior_conversation: vec![earlier],
            previous_summary: None,
            query: "next".into(),
            counters: TurnCounters {
                turn_number: 8,
                ..Default::default()
            },
            tool_call: false,
            new_chat: false,
        };
        assert_eq!(summary_range(&req), (3, 7));
    }
}
