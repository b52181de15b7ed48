//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style proxies, Ollama, vLLM, LM Studio and any
//! other endpoint that follows the OpenAI chat completions contract.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::Value;

use crate::naming::{build_chat_name_prompt, clean_chat_name};
use crate::summarize::{build_summary_prompt, should_regenerate};
use crate::traits::{
    summary_range, ChatNameRequest, LlmProvider, ResponseRequest, ResponseStatus, SummaryRequest,
};
use crate::util::{from_reqwest, resolve_api_key, saturating_u32};
use tl_domain::config::{ChatNameConfig, LlmConfig, SummaryConfig};
use tl_domain::error::{Error, Result};
use tl_domain::message::{estimate_tokens, ContentPart, Message, Role};
use tl_domain::stream::{StreamEvent, StreamSink};
use tl_domain::summary::GeneratedSummary;
use tl_domain::tool::Tool;
use tl_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for any OpenAI-compatible API endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    summary: SummaryConfig,
    chat_name: ChatNameConfig,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the `[llm]` config section.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.api_key_env)?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "openai_compat".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            summary: cfg.summary.clone(),
            chat_name: cfg.chat_name.clone(),
            client,
        })
    }

    fn summary_model(&self) -> &str {
        self.summary.model.as_deref().unwrap_or(&self.model)
    }

    fn chat_name_model(&self) -> &str {
        self.chat_name.model.as_deref().unwrap_or(&self.model)
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    // ── Internal: build the JSON body ─────────────────────────────

    fn build_chat_body(
        &self,
        model: &str,
        messages: Vec<Value>,
        tools: &[Arc<dyn Tool>],
        stream: bool,
        max_tokens: Option<u32>,
    ) -> Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(|t| tool_to_openai(t.as_ref())).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let url = self.chat_url();
        tracing::debug!(provider = %self.id, url = %url, "openai_compat request");

        let resp = self
            .authed_post(&url)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }
        Ok(resp)
    }

    /// One non-streaming completion for a single user prompt. Returns the
    /// trimmed reply text and the reported completion tokens.
    async fn complete_text(
        &self,
        model: &str,
        prompt: String,
        max_tokens: u32,
    ) -> Result<(String, Option<u32>)> {
        let messages = vec![serde_json::json!({"role": "user", "content": prompt})];
        let body = self.build_chat_body(model, messages, &[], false, Some(max_tokens));

        let started = Instant::now();
        let resp = self.send(&body).await?;
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;

        let content = resp_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "no content in completion response".into(),
            })?
            .trim()
            .to_string();

        let usage = resp_json.get("usage");
        let prompt_tokens = usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(Value::as_u64)
            .map(saturating_u32);
        let completion_tokens = usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_u64)
            .map(saturating_u32);

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model: model.to_string(),
            streaming: false,
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens,
            completion_tokens,
        }
        .emit();

        Ok((content, completion_tokens))
    }

    /// Execute every pending tool call on `ai_message`, recording outputs
    /// in place.
    async fn run_tools(
        &self,
        tools: &[Arc<dyn Tool>],
        ai_message: &mut Message,
        sink: Option<&StreamSink>,
    ) {
        let pending: Vec<(String, String, Value)> = ai_message
            .pending_tool_calls()
            .map(|(id, name, input)| (id.to_owned(), name.to_owned(), input.clone()))
            .collect();

        for (call_id, name, input) in pending {
            let tool = tools.iter().find(|t| t.definition().name == name);
            let (output, failed) = match tool {
                Some(tool) => match tool.call(input).await {
                    Ok(v) => (v, false),
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "tool call failed");
                        (serde_json::json!({"error": e.to_string()}), true)
                    }
                },
                None => (
                    serde_json::json!({"error": format!("unknown tool '{name}'")}),
                    true,
                ),
            };
            if let Some(sink) = sink {
                sink.emit(StreamEvent::ToolOutputAvailable {
                    tool_call_id: call_id.clone(),
                    output: output.clone(),
                });
            }
            ai_message.set_tool_output(&call_id, output, failed);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message, out: &mut Vec<Value>) {
    if msg.is_system() {
        out.push(serde_json::json!({"role": "system", "content": msg.text()}));
        return;
    }
    match msg.role {
        Role::Human => out.push(serde_json::json!({"role": "user", "content": msg.text()})),
        Role::Ai | Role::Tool => assistant_to_openai(msg, out),
    }
}

/// An AI message interleaves text and executed tool calls. Each run of
/// text + calls becomes one assistant message followed by its tool results.
fn assistant_to_openai(msg: &Message, out: &mut Vec<Value>) {
    let mut text = String::new();
    let mut calls: Vec<Value> = Vec::new();
    let mut results: Vec<Value> = Vec::new();

    fn flush(text: &mut String, calls: &mut Vec<Value>, results: &mut Vec<Value>, out: &mut Vec<Value>) {
        if text.is_empty() && calls.is_empty() {
            return;
        }
        let mut obj = serde_json::json!({"role": "assistant"});
        obj["content"] = if text.is_empty() {
            Value::Null
        } else {
            Value::String(std::mem::take(text))
        };
        if !calls.is_empty() {
            obj["tool_calls"] = Value::Array(std::mem::take(calls));
        }
        out.push(obj);
        out.append(results);
    }

    for part in &msg.parts {
        match part {
            ContentPart::Text { text: t } => {
                if !calls.is_empty() {
                    flush(&mut text, &mut calls, &mut results, out);
                }
                text.push_str(t);
            }
            ContentPart::Reasoning { .. } => {}
            ContentPart::ToolCall {
                tool_call_id,
                tool_name,
                input,
                output,
                ..
            } => {
                calls.push(serde_json::json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": {
                        "name": tool_name,
                        "arguments": input.to_string(),
                    }
                }));
                let content = match output {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => String::new(),
                };
                results.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    flush(&mut text, &mut calls, &mut results, out);
}

fn tool_to_openai(tool: &dyn Tool) -> Value {
    let def = tool.definition();
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One decoded piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
enum Chunk {
    Text(String),
    Reasoning(String),
    ToolCallStart { index: u64, id: String, name: String },
    ToolCallArgs { index: u64, delta: String },
    Finish(String),
    Usage { prompt: u32, completion: u32 },
}

fn parse_sse_data(data: &str) -> Vec<Result<Chunk>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut chunks = Vec::new();

    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let prompt = saturating_u32(usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0));
        let completion = saturating_u32(
            usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        );
        chunks.push(Ok(Chunk::Usage { prompt, completion }));
    }

    let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    else {
        return chunks;
    };
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    // Reasoning content (DeepSeek, etc.)
    if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            chunks.push(Ok(Chunk::Reasoning(text.to_string())));
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            chunks.push(Ok(Chunk::Text(text.to_string())));
        }
    }

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let func = tc.get("function");
            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = func
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                chunks.push(Ok(Chunk::ToolCallStart {
                    index,
                    id: id.to_string(),
                    name: name.to_string(),
                }));
            }
            if let Some(args) = func
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                if !args.is_empty() {
                    chunks.push(Ok(Chunk::ToolCallArgs {
                        index,
                        delta: args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        chunks.push(Ok(Chunk::Finish(fr.to_string())));
    }

    chunks
}

/// Completion tokens for one streamed call: reported usage when present,
/// otherwise an estimate over the text this call produced.
fn step_completion_tokens(usage: Option<(u32, u32)>, produced: &str) -> u32 {
    usage
        .map(|(_, completion)| completion)
        .unwrap_or_else(|| estimate_tokens(produced))
}

/// Which streamed block is currently open on the sink.
#[derive(Debug, Clone, PartialEq)]
enum OpenBlock {
    None,
    Text(String),
    Reasoning(String),
}

impl OpenBlock {
    fn close(&mut self, sink: Option<&StreamSink>) {
        let prev = std::mem::replace(self, OpenBlock::None);
        if let Some(sink) = sink {
            match prev {
                OpenBlock::Text(id) => sink.emit(StreamEvent::TextEnd { id }),
                OpenBlock::Reasoning(id) => sink.emit(StreamEvent::ReasoningEnd { id }),
                OpenBlock::None => {}
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn generate_response(
        &self,
        req: &ResponseRequest,
        ai_message: &mut Message,
        sink: Option<&StreamSink>,
    ) -> Result<ResponseStatus> {
        let mut messages = Vec::new();
        for msg in &req.history {
            msg_to_openai(msg, &mut messages);
        }
        if !ai_message.parts.is_empty() {
            msg_to_openai(ai_message, &mut messages);
        }
        let body = self.build_chat_body(&self.model, messages, &req.tools, true, None);

        if let (Some(sink), true) = (sink, ai_message.parts.is_empty()) {
            sink.emit(StreamEvent::Start {
                message_id: ai_message.id.clone(),
            });
        }

        let started = Instant::now();
        let resp = self.send(&body).await?;
        let mut stream = crate::sse::sse_response_stream(resp, parse_sse_data);

        let mut open = OpenBlock::None;
        let mut calls: BTreeMap<u64, (String, String, String)> = BTreeMap::new();
        let mut usage: Option<(u32, u32)> = None;
        // Text produced by this call only; earlier steps are already counted.
        let mut produced = String::new();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                Chunk::Text(delta) => {
                    if !matches!(open, OpenBlock::Text(_)) {
                        open.close(sink);
                        let id = format!("{}-{}", ai_message.id, ai_message.parts.len());
                        if let Some(sink) = sink {
                            sink.emit(StreamEvent::TextStart { id: id.clone() });
                        }
                        open = OpenBlock::Text(id);
                    }
                    if let (Some(sink), OpenBlock::Text(id)) = (sink, &open) {
                        sink.emit(StreamEvent::TextDelta {
                            id: id.clone(),
                            delta: delta.clone(),
                        });
                    }
                    ai_message.push_text(&delta);
                    produced.push_str(&delta);
                }
                Chunk::Reasoning(delta) => {
                    if !matches!(open, OpenBlock::Reasoning(_)) {
                        open.close(sink);
                        let id = format!("{}-{}", ai_message.id, ai_message.parts.len());
                        if let Some(sink) = sink {
                            sink.emit(StreamEvent::ReasoningStart { id: id.clone() });
                        }
                        open = OpenBlock::Reasoning(id);
                    }
                    if let (Some(sink), OpenBlock::Reasoning(id)) = (sink, &open) {
                        sink.emit(StreamEvent::ReasoningDelta {
                            id: id.clone(),
                            delta: delta.clone(),
                        });
                    }
                    ai_message.push_reasoning(&delta);
                    produced.push_str(&delta);
                }
                Chunk::ToolCallStart { index, id, name } => {
                    open.close(sink);
                    calls.insert(index, (id, name, String::new()));
                }
                Chunk::ToolCallArgs { index, delta } => {
                    if let Some((_, _, args)) = calls.get_mut(&index) {
                        args.push_str(&delta);
                    }
                }
                Chunk::Usage { prompt, completion } => usage = Some((prompt, completion)),
                Chunk::Finish(_) => {}
            }
        }
        open.close(sink);

        ai_message.token_count = ai_message
            .token_count
            .saturating_add(step_completion_tokens(usage, &produced));

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model: self.model.clone(),
            streaming: sink.is_some(),
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: usage.map(|(p, _)| p),
            completion_tokens: usage.map(|(_, c)| c),
        }
        .emit();

        if calls.is_empty() {
            return Ok(ResponseStatus::Complete);
        }

        for (call_id, name, args) in calls.into_values() {
            let input: Value = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()))
            };
            if let Some(sink) = sink {
                sink.emit(StreamEvent::ToolInputAvailable {
                    tool_call_id: call_id.clone(),
                    tool_name: name.clone(),
                    input: input.clone(),
                });
            }
            ai_message.push_tool_call(&call_id, &name, input);
        }
        self.run_tools(&req.tools, ai_message, sink).await;

        Ok(ResponseStatus::ToolCall)
    }

    async fn generate_summary(&self, req: &SummaryRequest) -> Result<Option<GeneratedSummary>> {
        if !should_regenerate(&self.summary, req) {
            return Ok(None);
        }

        let prompt = build_summary_prompt(req);
        let (content, completion_tokens) = self
            .complete_text(self.summary_model(), prompt, self.summary.max_tokens)
            .await?;

        let (start_turn_number, end_turn_number) = summary_range(req);
        Ok(Some(GeneratedSummary {
            token_count: completion_tokens.unwrap_or_else(|| estimate_tokens(&content)),
            content,
            start_turn_number,
            end_turn_number,
        }))
    }

    async fn generate_chat_name(&self, req: &ChatNameRequest) -> Result<String> {
        let prompt = build_chat_name_prompt(req);
        let (raw, _) = self
            .complete_text(self.chat_name_model(), prompt, self.chat_name.max_tokens)
            .await?;
        clean_chat_name(&raw, req.max_words, req.max_length).ok_or_else(|| Error::Provider {
            provider: self.id.clone(),
            message: "empty chat name in response".into(),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
