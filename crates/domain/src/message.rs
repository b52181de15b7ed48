use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Length of client-compatible message ids.
pub const MESSAGE_ID_LEN: usize = 16;

/// Fixed reply substituted when a turn cannot be completed.
pub const FALLBACK_REPLY: &str =
    "I apologize, but something went wrong while processing your request. Please try again.";

/// Mint a fresh message id.
pub fn new_message_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(MESSAGE_ID_LEN);
    id
}

/// Rough token estimate for text that has not been through a tokenizer.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
    Tool,
}

/// One typed piece of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    /// A tool invocation and, once executed, its output.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// A conversation message. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    #[serde(default)]
    pub turn_number: u32,
    #[serde(default)]
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    fn empty(id: String, role: Role) -> Self {
        Self {
            id,
            role,
            parts: Vec::new(),
            turn_number: 0,
            token_count: 0,
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// A human message. Reuses the caller-supplied id when present.
    pub fn human(id: Option<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut msg = Self::empty(id.unwrap_or_else(new_message_id), Role::Human);
        msg.token_count = estimate_tokens(&text);
        msg.parts.push(ContentPart::Text { text });
        msg
    }

    /// An empty AI message that a provider fills in while generating.
    pub fn ai() -> Self {
        Self::empty(new_message_id(), Role::Ai)
    }

    /// An instruction message placed at the head of the conversation.
    /// Carried as a human-role text part with `system` metadata.
    pub fn system(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut msg = Self::empty(new_message_id(), Role::Human);
        msg.token_count = estimate_tokens(&text);
        msg.parts.push(ContentPart::Text { text });
        msg.metadata.insert("system".into(), Value::Bool(true));
        msg
    }

    /// The fixed apology reply used on the fallback path.
    pub fn fallback_reply() -> Self {
        let mut msg = Self::ai();
        msg.metadata.insert("error".into(), Value::Bool(true));
        msg.push_text(FALLBACK_REPLY);
        msg.token_count = estimate_tokens(FALLBACK_REPLY);
        msg
    }

    pub fn is_system(&self) -> bool {
        self.metadata
            .get("system")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Append streamed text, extending the trailing text part if there is one.
    pub fn push_text(&mut self, delta: &str) {
        if let Some(ContentPart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(ContentPart::Text {
                text: delta.to_owned(),
            });
        }
    }

    /// Append streamed reasoning, extending the trailing reasoning part if there is one.
    pub fn push_reasoning(&mut self, delta: &str) {
        if let Some(ContentPart::Reasoning { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(ContentPart::Reasoning {
                text: delta.to_owned(),
            });
        }
    }

    pub fn push_tool_call(&mut self, tool_call_id: &str, tool_name: &str, input: Value) {
        self.parts.push(ContentPart::ToolCall {
            tool_call_id: tool_call_id.to_owned(),
            tool_name: tool_name.to_owned(),
            input,
            output: None,
            is_error: false,
        });
    }

    /// Record a tool's output on its matching call part. Returns false when
    /// no call with that id exists.
    pub fn set_tool_output(&mut self, call_id: &str, value: Value, failed: bool) -> bool {
        for part in &mut self.parts {
            if let ContentPart::ToolCall {
                tool_call_id,
                output,
                is_error,
                ..
            } = part
            {
                if tool_call_id == call_id {
                    *output = Some(value);
                    *is_error = failed;
                    return true;
                }
            }
        }
        false
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls that have not received an output yet.
    pub fn pending_tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::ToolCall {
                tool_call_id,
                tool_name,
                input,
                output: None,
                ..
            } => Some((tool_call_id.as_str(), tool_name.as_str(), input)),
            _ => None,
        })
    }
}
