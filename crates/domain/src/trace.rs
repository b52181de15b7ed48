use serde::Serialize;

/// Structured trace events emitted across all Threadline crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        user_id: String,
        is_new: bool,
    },
    ContextAssembled {
        session_id: String,
        turn_number: u32,
        window_messages: usize,
        window_tokens: u32,
        turns_after_last_summary: u32,
        has_summary: bool,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    TurnCompleted {
        session_id: String,
        turn_number: u32,
        steps: u32,
        regenerated_summary: bool,
    },
    TurnFallback {
        session_id: String,
        turn_number: u32,
        reason: String,
    },
    TurnCancelled {
        session_id: String,
        turn_number: u32,
        partial_parts: usize,
    },
    SummaryPersisted {
        session_id: String,
        summary_id: String,
        end_turn_number: u32,
    },
    MessagesPersisted {
        session_id: String,
        turn_number: u32,
        count: usize,
        fallback: bool,
    },
    CancelRequested {
        session_id: String,
        was_running: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tl_event");
    }
}
