//! Rolling-summary policy and prompt construction.
//!
//! The turn engine never decides when to summarize; adapters call
//! [`should_regenerate`] and, when it says yes, send [`build_summary_prompt`]
//! to their summary model.

use tl_domain::config::SummaryConfig;
use tl_domain::message::{ContentPart, Message, Role};

use crate::traits::SummaryRequest;

/// Whether a new summary should be produced for this request.
///
/// Never on tool-call continuations or with nothing to summarize; otherwise
/// once enough turns or tokens piled up after the last summary.
pub fn should_regenerate(cfg: &SummaryConfig, req: &SummaryRequest) -> bool {
    if req.tool_call || req.prior_conversation.is_empty() {
        return false;
    }
    req.counters.turns_after_last_summary >= cfg.every_turns
        || req.counters.total_token_after_last_summary >= cfg.token_threshold
}

/// Flatten messages into a plain transcript for the summarizer.
pub fn build_conversation_text(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages.iter().filter(|m| !m.is_system()) {
        let speaker = match msg.role {
            Role::Human => "User",
            Role::Ai => "Assistant",
            Role::Tool => "Tool",
        };
        for part in &msg.parts {
            match part {
                ContentPart::Text { text } => {
                    out.push_str(&format!("{speaker}: {text}\n"));
                }
                ContentPart::ToolCall {
                    tool_name, output, ..
                } => {
                    out.push_str(&format!("[tool {tool_name}]"));
                    if let Some(output) = output {
                        let rendered = output.to_string();
                        let clipped: String = rendered.chars().take(500).collect();
                        out.push_str(&format!(" -> {clipped}"));
                    }
                    out.push('\n');
                }
                ContentPart::Reasoning { .. } => {}
            }
        }
    }
    out
}

/// The summarizer prompt: previous summary, conversation, and the incoming
/// query for relevance.
pub fn build_summary_prompt(req: &SummaryRequest) -> String {
    let conversation = build_conversation_text(&req.prior_conversation);
    let previous = req
        .previous_summary
        .as_ref()
        .map(|s| s.content())
        .unwrap_or("(none)");

    format!(
        "You are a conversation summarizer. Merge the previous summary and the \
         conversation below into one concise summary that preserves:\n\
         1. The user's goals and open questions\n\
         2. Key decisions and facts learned about the user\n\
         3. Results of tool calls that later turns may rely on\n\n\
         Write in present tense. Omit greetings and pleasantries.\n\
         The user is about to ask: {query}\n\n\
         PREVIOUS SUMMARY:\n{previous}\n\n\
         CONVERSATION:\n{conversation}",
        query = req.query,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TurnCounters;

    fn request(turns: u32, tokens: u32) -> SummaryRequest {
        let mut human = Message::human(None, "What is a borrow checker?");
        human.turn_number = 1;
        let mut ai = Message::ai();
        ai.push_text("It enforces ownership rules.");
        ai.turn_number = 1;
        SummaryRequest {
            prior_conversation: vec![human, ai],
            previous_summary: None,
            query: "And lifetimes?".into(),
            counters: TurnCounters {
                turn_number: 2,
                turns_after_last_summary: turns,
                total_token_after_last_summary: tokens,
            },
            tool_call: false,
            new_chat: false,
        }
    }

    #[test]
    fn regenerates_on_turn_count() {
        let cfg = SummaryConfig::default();
        assert!(!should_regenerate(&cfg, &request(cfg.every_turns - 1, 0)));
        assert!(should_regenerate(&cfg, &request(cfg.every_turns, 0)));
    }

    #[test]
    fn regenerates_on_token_count() {
        let cfg = SummaryConfig::default();
        assert!(should_regenerate(&cfg, &request(1, cfg.token_threshold)));
    }

    #[test]
    fn never_on_tool_call_or_empty_history() {
        let cfg = SummaryConfig::default();
        let mut req = request(100, 100_000);
        req.tool_call = true;
        assert!(!should_regenerate(&cfg, &req));

        let mut req = request(100, 100_000);
        req.prior_conversation.clear();
        assert!(!should_regenerate(&cfg, &req));
    }

    #[test]
    fn prompt_contains_transcript_and_query() {
        let prompt = build_summary_prompt(&request(6, 0));
        assert!(prompt.contains("User: What is a borrow checker?"));
        assert!(prompt.contains("Assistant: It enforces ownership rules."));
        assert!(prompt.contains("And lifetimes?"));
        assert!(prompt.contains("PREVIOUS SUMMARY:\n(none)"));
    }
}
