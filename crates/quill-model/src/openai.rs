// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI chat-completions adapter.
//!
//! Also serves every OpenAI-compatible runtime (Ollama, vLLM, LM Studio)
//! against a caller-configured base URL — the wire format is identical, only
//! the endpoint and auth differ.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::EventStream;
use crate::sse::{assemble, scan_sse, ProviderStreamHandler};
use crate::{ChatEvent, ChatRequest, Message, PartialCall, Role, StreamEvent, Usage};

pub struct OpenAiProvider {
    /// Driver id returned by `ModelProvider::name()` (`"openai"` / `"ollama"`).
    driver_name: &'static str,
    model: String,
    api_key: Option<String>,
    /// Full chat completions URL, e.g. `https://api.openai.com/v1/chat/completions`.
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    /// Model-name prefixes treated as reasoning models (config-driven).
    reasoning_prefixes: Vec<String>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        reasoning_prefixes: Vec<String>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            reasoning_prefixes,
            client: reqwest::Client::new(),
        }
    }

    /// True when the configured model matches a reasoning-model prefix.
    /// Reasoning models reject `temperature` and `parallel_tool_calls`.
    fn is_reasoning_model(&self) -> bool {
        self.reasoning_prefixes
            .iter()
            .any(|p| self.model.starts_with(p.as_str()))
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages = build_openai_messages(&req.messages);

        // OpenAI's newer models take "max_completion_tokens"; compatible
        // local runtimes still expect "max_tokens".
        let max_tokens_key = if self.driver_name == "openai" {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
            max_tokens_key: self.max_tokens,
        });
        if req.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !self.is_reasoning_model() {
            body["temperature"] = json!(self.temperature);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            if !self.is_reasoning_model() {
                body["parallel_tool_calls"] = json!(true);
            }
        }
        body
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let body = self.build_body(&req);

        debug!(
            driver = %self.driver_name,
            model = %self.model,
            stream = req.stream,
            tool_count = req.tools.len(),
            message_count = req.messages.len(),
            "sending chat completion request"
        );

        let mut http = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            anyhow::anyhow!("{} transport failure: {e}", self.driver_name)
        })?;

        if !resp.status().is_success() {
            // Surfaced as a single textual token so the orchestrator shows
            // the provider's own explanation instead of failing silently.
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let token = format!("{} error {status}: {text}", self.driver_name);
            return Ok(Box::pin(futures::stream::iter(vec![
                Ok(ChatEvent::Token(token)),
                Ok(ChatEvent::Done),
            ])));
        }

        if req.stream {
            let events = scan_sse(resp.bytes_stream(), OpenAiStreamHandler::default());
            Ok(Box::pin(assemble(events)))
        } else {
            let v: Value = resp.json().await?;
            Ok(Box::pin(futures::stream::iter(
                parse_complete_response(&v).into_iter(),
            )))
        }
    }
}

// ─── Streaming parser ────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct OpenAiStreamHandler {
    /// Set once reasoning deltas have been seen, so the transition to answer
    /// text can emit the collapse signal.
    in_reasoning: bool,
}

impl ProviderStreamHandler for OpenAiStreamHandler {
    fn handle(&mut self, _event: Option<&str>, data: &str) -> Vec<StreamEvent> {
        if data == "[DONE]" {
            return vec![StreamEvent::End];
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return vec![],
        };
        self.parse_chunk(&v)
    }
}

impl OpenAiStreamHandler {
    fn parse_chunk(&mut self, v: &Value) -> Vec<StreamEvent> {
        // Usage-only chunk (stream_options.include_usage).
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            let input = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
            let output = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
            let total = usage["total_tokens"].as_u64().unwrap_or((input + output) as u64) as u32;
            return vec![StreamEvent::Usage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: total,
            }];
        }

        let choice = &v["choices"][0];
        let mut out = Vec::new();

        let delta = &choice["delta"];

        // Each SSE chunk carries at most one tool-call delta in practice; the
        // index field routes accumulation for parallel calls.
        if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
            let index = tc["index"].as_u64().unwrap_or(0) as u32;
            let id = tc["id"].as_str().filter(|s| !s.is_empty()).map(String::from);
            let name = tc["function"]["name"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(String::from);
            let args = tc["function"]["arguments"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(String::from);
            out.push(StreamEvent::ToolCallDelta { index, id, name, args_fragment: args });
        }

        // Reasoning text arrives as `reasoning_content` (llama.cpp, DeepSeek)
        // or `reasoning` (aggregators).  Prefer the former.
        let reasoning = delta
            .get("reasoning_content")
            .and_then(Value::as_str)
            .or_else(|| delta.get("reasoning").and_then(Value::as_str))
            .filter(|s| !s.is_empty());
        if let Some(text) = reasoning {
            self.in_reasoning = true;
            out.push(StreamEvent::ReasoningDelta { content: text.to_string(), done: false });
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                if self.in_reasoning {
                    // First answer text collapses the reasoning block.
                    self.in_reasoning = false;
                    out.push(StreamEvent::ReasoningDelta { content: String::new(), done: true });
                }
                out.push(StreamEvent::TextDelta { content: text.to_string() });
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            if reason == "tool_calls" {
                out.push(StreamEvent::ToolCallEnd { finish_reason: reason.to_string() });
            }
        }

        out
    }
}

/// Parse a complete (non-streaming) chat-completions response into the same
/// event sequence the streaming path produces.
pub(crate) fn parse_complete_response(v: &Value) -> Vec<anyhow::Result<ChatEvent>> {
    let mut out: Vec<anyhow::Result<ChatEvent>> = Vec::new();
    let message = &v["choices"][0]["message"];

    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            out.push(Ok(ChatEvent::Token(text.to_string())));
        }
    }

    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, tc) in calls.iter().enumerate() {
            let partial = PartialCall {
                index: i as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                args_buf: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            };
            if let Some(call) = partial.finish() {
                out.push(Ok(ChatEvent::Call(call)));
            }
        }
    }

    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let input = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
        out.push(Ok(ChatEvent::Usage(Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: usage["total_tokens"].as_u64().unwrap_or((input + output) as u64) as u32,
        })));
    }

    out.push(Ok(ChatEvent::Done));
    out
}

// ─── Wire format ─────────────────────────────────────────────────────────────

/// Convert engine messages into the OpenAI wire-format array.
///
/// Consecutive assistant tool_use messages are coalesced into a single
/// assistant message with a `tool_calls` array — the engine stores each call
/// as its own message, but the wire contract requires one message per
/// assistant turn.
pub(crate) fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    fn tool_call_json(m: &Message) -> Value {
        json!({
            "id": m.tool_id.as_deref().unwrap_or_default(),
            "type": "function",
            "function": {
                "name": m.name.as_deref().unwrap_or_default(),
                "arguments": m.tool_use_args().to_string(),
            }
        })
    }

    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let m = &messages[i];

        if m.is_tool_use() {
            let mut calls = vec![tool_call_json(m)];
            i += 1;
            while i < messages.len() && messages[i].is_tool_use() {
                calls.push(tool_call_json(&messages[i]));
                i += 1;
            }
            out.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match m.role {
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_id.as_deref().unwrap_or_default(),
                "content": m.content,
            }),
            role => json!({ "role": role.as_str(), "content": m.content }),
        };
        out.push(v);
        i += 1;
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
