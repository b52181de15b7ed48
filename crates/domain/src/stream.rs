use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Events pushed to a streaming caller, in the UI message stream shape
/// (`type` discriminator, camelCase payload fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: Value,
    },
    Finish {
        #[serde(rename = "finishReason")]
        finish_reason: String,
    },
    /// Terminal event carrying the structured turn result.
    DataSession {
        data: Value,
    },
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    Cancelled {
        message: String,
    },
}

impl StreamEvent {
    pub fn finish_stop() -> Self {
        Self::Finish {
            finish_reason: "stop".into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled {
            message: "Stream cancelled by user".into(),
        }
    }
}

/// Queue item: an event, or the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Event(StreamEvent),
    End,
}

/// Producer half of a turn's event queue. Cloned into every stage that
/// streams; a dropped receiver is not an error for producers.
#[derive(Debug, Clone)]
pub struct StreamSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl StreamSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(Envelope::Event(event));
    }

    /// Push the end-of-stream sentinel.
    pub fn close(&self) {
        let _ = self.tx.send(Envelope::End);
    }

    /// Stream a complete text reply as one start/delta/end block.
    pub fn emit_text_block(&self, id: &str, text: &str) {
        self.emit(StreamEvent::TextStart { id: id.to_owned() });
        self.emit(StreamEvent::TextDelta {
            id: id.to_owned(),
            delta: text.to_owned(),
        });
        self.emit(StreamEvent::TextEnd { id: id.to_owned() });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
