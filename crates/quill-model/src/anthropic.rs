// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic messages-API adapter with extended-thinking support.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::provider::EventStream;
use crate::sse::{assemble, scan_sse, ProviderStreamHandler};
use crate::{ChatEvent, ChatRequest, Message, PartialCall, Role, StreamEvent, Usage};

/// Minimum `budget_tokens` the thinking API accepts.  Extended thinking is
/// only enabled when the configured `max_tokens` leaves room above this.
const MIN_THINKING_BUDGET: u32 = 1024;

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }

    /// Thinking budget for streaming requests: half the output budget,
    /// strictly below `max_tokens` as the API requires.  `None` disables
    /// thinking when the output budget is too small to split.
    fn thinking_budget(&self) -> Option<u32> {
        let budget = self.max_tokens / 2;
        (budget >= MIN_THINKING_BUDGET).then_some(budget)
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let (system_text, messages) = build_anthropic_messages(&req.messages);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": req.stream,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        // Extended thinking rides along with streaming turns.  The API
        // requires temperature = 1 whenever thinking is enabled.
        if req.stream {
            if let Some(budget) = self.thinking_budget() {
                body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
                body["temperature"] = json!(1);
            }
        }
        body
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "claude"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;

        let body = self.build_body(&req);
        debug!(
            model = %self.model,
            stream = req.stream,
            tool_count = req.tools.len(),
            "sending anthropic request"
        );

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("claude transport failure: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let token = format!("claude error {status}: {text}");
            return Ok(Box::pin(futures::stream::iter(vec![
                Ok(ChatEvent::Token(token)),
                Ok(ChatEvent::Done),
            ])));
        }

        if req.stream {
            let events = scan_sse(resp.bytes_stream(), AnthropicStreamHandler::default());
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
pub(crate) struct AnthropicStreamHandler {
    /// Content-block type per index, recorded at `content_block_start` so the
    /// matching `content_block_stop` knows what it is closing.
    block_types: HashMap<u32, String>,
    /// Input tokens from `message_start`, merged into the final usage event.
    input_tokens: u32,
}

impl ProviderStreamHandler for AnthropicStreamHandler {
    fn handle(&mut self, event: Option<&str>, data: &str) -> Vec<StreamEvent> {
        // Anthropic names every event; `ping` carries no payload of interest.
        if event == Some("ping") {
            return vec![];
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return vec![],
        };
        // The JSON `type` field duplicates the SSE event name; trust the
        // payload so the parser also works on providers that omit the field.
        let kind = v["type"].as_str().or(event).unwrap_or("");
        self.parse_event(kind, &v)
    }
}

impl AnthropicStreamHandler {
    fn parse_event(&mut self, kind: &str, v: &Value) -> Vec<StreamEvent> {
        match kind {
            "message_start" => {
                if let Some(usage) = v["message"].get("usage") {
                    self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                }
                vec![]
            }
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                let btype = block["type"].as_str().unwrap_or("").to_string();
                self.block_types.insert(index, btype.clone());
                if btype == "tool_use" {
                    vec![StreamEvent::ToolCallDelta {
                        index,
                        id: block["id"].as_str().map(String::from),
                        name: block["name"].as_str().map(String::from),
                        args_fragment: None,
                    }]
                } else {
                    vec![]
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        vec![StreamEvent::TextDelta { content: text.to_string() }]
                    }
                    "input_json_delta" => {
                        let partial = delta["partial_json"].as_str().unwrap_or("");
                        vec![StreamEvent::ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            args_fragment: Some(partial.to_string()),
                        }]
                    }
                    "thinking_delta" => {
                        let thinking = delta["thinking"].as_str().unwrap_or("");
                        if thinking.is_empty() {
                            vec![]
                        } else {
                            vec![StreamEvent::ReasoningDelta {
                                content: thinking.to_string(),
                                done: false,
                            }]
                        }
                    }
                    // Encrypted integrity blob closing every thinking block.
                    // Never surfaced as text.
                    "signature_delta" => vec![],
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                match self.block_types.remove(&index).as_deref() {
                    Some("thinking") => {
                        vec![StreamEvent::ReasoningDelta { content: String::new(), done: true }]
                    }
                    _ => vec![],
                }
            }
            "message_delta" => {
                let mut out = Vec::new();
                if v["delta"]["stop_reason"].as_str() == Some("tool_use") {
                    out.push(StreamEvent::ToolCallEnd { finish_reason: "tool_use".into() });
                }
                if let Some(usage) = v.get("usage") {
                    let output = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
                    out.push(StreamEvent::Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: output,
                        total_tokens: self.input_tokens + output,
                    });
                }
                out
            }
            "message_stop" => vec![StreamEvent::End],
            "error" => {
                let msg = v["error"]["message"].as_str().unwrap_or("unknown stream error");
                vec![StreamEvent::Error { message: msg.to_string() }]
            }
            _ => vec![],
        }
    }
}

/// Parse a complete (non-streaming) messages response.
pub(crate) fn parse_complete_response(v: &Value) -> Vec<anyhow::Result<ChatEvent>> {
    let mut out: Vec<anyhow::Result<ChatEvent>> = Vec::new();

    if let Some(blocks) = v["content"].as_array() {
        for (i, block) in blocks.iter().enumerate() {
            match block["type"].as_str().unwrap_or("") {
                "text" => {
                    let text = block["text"].as_str().unwrap_or("");
                    if !text.is_empty() {
                        out.push(Ok(ChatEvent::Token(text.to_string())));
                    }
                }
                "tool_use" => {
                    let partial = PartialCall {
                        index: i as u32,
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        args_buf: block["input"].to_string(),
                    };
                    if let Some(call) = partial.finish() {
                        out.push(Ok(ChatEvent::Call(call)));
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(usage) = v.get("usage") {
        let input = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
        out.push(Ok(ChatEvent::Usage(Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        })));
    }

    out.push(Ok(ChatEvent::Done));
    out
}

// ─── Wire format ─────────────────────────────────────────────────────────────

/// Convert engine messages into the Anthropic wire format.
///
/// Returns `(system_text, conversation_messages)`.  System messages are
/// aggregated into the top-level `system` field; tool results become
/// user-role `tool_result` blocks.  If the assembled array does not end with
/// a user message the API rejects the request, so a minimal user nudge is
/// appended in that case.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::Assistant if m.is_tool_use() => {
                // tool_use.id must match ^[a-zA-Z0-9_-]+$; an empty id arises
                // when a content_block_start was lost mid-stream.  Substitute
                // a stable fallback rather than sending an invalid request.
                let id = match m.tool_id.as_deref() {
                    Some(id) if !id.is_empty() => id.to_string(),
                    _ => {
                        warn!(
                            tool_name = m.name.as_deref().unwrap_or(""),
                            "tool_use message has empty id; substituting fallback"
                        );
                        "tc_fallback".to_string()
                    }
                };
                out.push(json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": id,
                        "name": m.name.as_deref().unwrap_or_default(),
                        "input": m.tool_use_args(),
                    }]
                }));
            }
            Role::Assistant => {
                out.push(json!({ "role": "assistant", "content": m.content }));
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.content }));
            }
            Role::Tool => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_id.as_deref().unwrap_or_default(),
                        "content": m.content,
                    }]
                }));
            }
        }
    }

    let ends_with_user = out
        .last()
        .map(|m| m["role"].as_str() == Some("user"))
        .unwrap_or(false);
    if !ends_with_user {
        out.push(json!({ "role": "user", "content": "Continue." }));
    }

    (system_parts.join("\n\n"), out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelProvider;
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(
            "claude-sonnet-4-5".into(),
            Some("test-key".into()),
            None,
            Some(8192),
            Some(0.2),
        )
    }

    #[test]
    fn provider_name_and_model() {
        let p = provider();
        assert_eq!(p.name(), "claude");
        assert_eq!(p.model_name(), "claude-sonnet-4-5");
    }

    // ── Request body ──────────────────────────────────────────────────────────

    #[test]
    fn streaming_enables_thinking_with_budget_below_max_tokens() {
        let p = provider();
        let body = p.build_body(&ChatRequest {
            messages: vec![Message::user("hi")],
            stream: true,
            ..Default::default()
        });
        let budget = body["thinking"]["budget_tokens"].as_u64().unwrap();
        assert!(budget < body["max_tokens"].as_u64().unwrap());
        assert_eq!(body["temperature"], json!(1), "thinking requires temperature=1");
    }

    #[test]
    fn non_streaming_has_no_thinking_and_keeps_temperature() {
        let p = provider();
        let body = p.build_body(&ChatRequest {
            messages: vec![Message::user("hi")],
            stream: false,
            ..Default::default()
        });
        assert!(body.get("thinking").is_none());
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn tiny_max_tokens_disables_thinking() {
        let p = AnthropicProvider::new("claude-sonnet-4-5".into(), None, None, Some(1024), None);
        assert!(p.thinking_budget().is_none());
        let body = p.build_body(&ChatRequest {
            messages: vec![Message::user("hi")],
            stream: true,
            ..Default::default()
        });
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn tools_use_input_schema_key() {
        let p = provider();
        let body = p.build_body(&ChatRequest {
            messages: vec![Message::user("x")],
            tools: vec![crate::ToolSchema {
                name: "read_file".into(),
                description: "read".into(),
                parameters: json!({"type": "object"}),
                safe: true,
            }],
            stream: false,
        });
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert!(body["tools"][0].get("input_schema").is_some());
    }

    // ── Message building ──────────────────────────────────────────────────────

    #[test]
    fn system_messages_aggregate_to_top_level() {
        let (sys, msgs) = build_anthropic_messages(&[
            Message::system("be helpful"),
            Message::system("be brief"),
            Message::user("hi"),
        ]);
        assert_eq!(sys, "be helpful\n\nbe brief");
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn tool_result_becomes_user_block_with_matching_id() {
        let (_, msgs) = build_anthropic_messages(&[
            Message::user("do it"),
            Message::tool_use("tu_1", "run_shell", &json!({"command": "ls"})),
            Message::tool_result("tu_1", "run_shell", "file.txt"),
        ]);
        let block = &msgs.last().unwrap()["content"][0];
        assert_eq!(msgs.last().unwrap()["role"], "user");
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "tu_1");
        assert_eq!(block["content"], "file.txt");
    }

    #[test]
    fn tool_use_becomes_assistant_block_with_input_object() {
        let (_, msgs) = build_anthropic_messages(&[
            Message::user("go"),
            Message::tool_use("tu_2", "read_file", &json!({"path": "a.rs"})),
            Message::tool_result("tu_2", "read_file", "..."),
        ]);
        let block = &msgs[1]["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["input"], json!({"path": "a.rs"}));
    }

    #[test]
    fn trailing_assistant_message_gets_user_nudge() {
        let (_, msgs) = build_anthropic_messages(&[
            Message::user("hi"),
            Message::assistant("hello"),
        ]);
        let last = msgs.last().unwrap();
        assert_eq!(last["role"], "user");
        assert_eq!(last["content"], "Continue.");
    }

    #[test]
    fn trailing_user_message_needs_no_nudge() {
        let (_, msgs) = build_anthropic_messages(&[Message::user("hi")]);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn trailing_tool_result_counts_as_user() {
        // tool_result serializes as a user-role message, satisfying the
        // last-message invariant without a nudge.
        let (_, msgs) = build_anthropic_messages(&[
            Message::user("go"),
            Message::tool_use("t", "run_shell", &json!({})),
            Message::tool_result("t", "run_shell", "out"),
        ]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs.last().unwrap()["role"], "user");
    }

    #[test]
    fn empty_tool_use_id_gets_fallback() {
        let mut m = Message::tool_use("", "run_shell", &json!({}));
        m.tool_id = Some(String::new());
        let (_, msgs) = build_anthropic_messages(&[Message::user("x"), m]);
        assert_eq!(msgs[1]["content"][0]["id"], "tc_fallback");
    }

    // ── Streaming events ──────────────────────────────────────────────────────

    #[test]
    fn message_start_records_input_tokens() {
        let mut h = AnthropicStreamHandler::default();
        let out = h.parse_event(
            "message_start",
            &json!({"type": "message_start", "message": {"usage": {"input_tokens": 42}}}),
        );
        assert!(out.is_empty());
        assert_eq!(h.input_tokens, 42);
    }

    #[test]
    fn tool_use_block_start_emits_delta_with_id_and_name() {
        let mut h = AnthropicStreamHandler::default();
        let out = h.parse_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_01", "name": "run_shell"}
            }),
        );
        assert_eq!(
            out,
            vec![StreamEvent::ToolCallDelta {
                index: 1,
                id: Some("toolu_01".into()),
                name: Some("run_shell".into()),
                args_fragment: None,
            }]
        );
    }

    #[test]
    fn text_delta_and_input_json_delta() {
        let mut h = AnthropicStreamHandler::default();
        let out = h.parse_event(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}}),
        );
        assert_eq!(out, vec![StreamEvent::TextDelta { content: "hi".into() }]);

        let out = h.parse_event(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"pa"}}),
        );
        assert_eq!(
            out,
            vec![StreamEvent::ToolCallDelta {
                index: 1,
                id: None,
                name: None,
                args_fragment: Some("{\"pa".into()),
            }]
        );
    }

    #[test]
    fn thinking_delta_maps_to_reasoning_and_stop_collapses() {
        let mut h = AnthropicStreamHandler::default();
        h.parse_event(
            "content_block_start",
            &json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking"}}),
        );
        let out = h.parse_event(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
        );
        assert_eq!(out, vec![StreamEvent::ReasoningDelta { content: "hmm".into(), done: false }]);

        let out = h.parse_event(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": 0}),
        );
        assert_eq!(out, vec![StreamEvent::ReasoningDelta { content: String::new(), done: true }]);
    }

    #[test]
    fn signature_delta_is_silently_discarded() {
        let mut h = AnthropicStreamHandler::default();
        let out = h.parse_event(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqRk"}}),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn text_block_stop_does_not_collapse_reasoning() {
        let mut h = AnthropicStreamHandler::default();
        h.parse_event(
            "content_block_start",
            &json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}}),
        );
        let out = h.parse_event("content_block_stop", &json!({"type": "content_block_stop", "index": 0}));
        assert!(out.is_empty());
    }

    #[test]
    fn message_delta_tool_use_stop_flushes_calls_and_usage() {
        let mut h = AnthropicStreamHandler::default();
        h.input_tokens = 100;
        let out = h.parse_event(
            "message_delta",
            &json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 50}}),
        );
        assert_eq!(
            out,
            vec![
                StreamEvent::ToolCallEnd { finish_reason: "tool_use".into() },
                StreamEvent::Usage { input_tokens: 100, output_tokens: 50, total_tokens: 150 },
            ]
        );
    }

    #[test]
    fn message_stop_ends_stream() {
        let mut h = AnthropicStreamHandler::default();
        let out = h.parse_event("message_stop", &json!({"type": "message_stop"}));
        assert_eq!(out, vec![StreamEvent::End]);
    }

    #[test]
    fn error_event_surfaces_message() {
        let mut h = AnthropicStreamHandler::default();
        let out = h.parse_event(
            "error",
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        );
        assert_eq!(out, vec![StreamEvent::Error { message: "Overloaded".into() }]);
    }

    #[test]
    fn ping_is_ignored() {
        let mut h = AnthropicStreamHandler::default();
        assert!(h.handle(Some("ping"), "{\"type\": \"ping\"}").is_empty());
    }

    // ── Non-streaming response ────────────────────────────────────────────────

    #[test]
    fn complete_response_text_and_usage() {
        let v = json!({
            "content": [{"type": "text", "text": "Hello"}],
            "usage": {"input_tokens": 10, "output_tokens": 2}
        });
        let out: Vec<ChatEvent> = parse_complete_response(&v).into_iter().map(Result::unwrap).collect();
        assert_eq!(out[0], ChatEvent::Token("Hello".into()));
        assert_eq!(
            out[1],
            ChatEvent::Usage(Usage { input_tokens: 10, output_tokens: 2, total_tokens: 12 })
        );
        assert_eq!(out[2], ChatEvent::Done);
    }

    #[test]
    fn complete_response_tool_use_block() {
        let v = json!({
            "content": [{"type": "tool_use", "id": "toolu_9", "name": "search_code", "input": {"query": "main"}}]
        });
        let out: Vec<ChatEvent> = parse_complete_response(&v).into_iter().map(Result::unwrap).collect();
        match &out[0] {
            ChatEvent::Call(tc) => {
                assert_eq!(tc.id, "toolu_9");
                assert_eq!(tc.args, json!({"query": "main"}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
