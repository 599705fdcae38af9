// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in the conversation history.
///
/// Tool correlation is carried in two optional fields rather than a content
/// enum: an assistant tool_use message has `tool_id` + `name` set and its
/// `content` holds the JSON-encoded arguments; a `Role::Tool` result message
/// has the matching `tool_id` and the tool output as `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Correlates assistant tool_use messages with their tool results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Tool name on tool_use and tool result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), tool_id: None, name: None }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), tool_id: None, name: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into(), tool_id: None, name: None }
    }

    /// Assistant message recording a tool invocation.  `args` is stored as
    /// the message content so the wire builders can replay it verbatim.
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, args: &Value) -> Self {
        Self {
            role: Role::Assistant,
            content: args.to_string(),
            tool_id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    /// True for assistant messages that record a tool invocation.
    pub fn is_tool_use(&self) -> bool {
        self.role == Role::Assistant && self.tool_id.is_some()
    }

    /// Parse the recorded tool_use arguments, defaulting to `{}` when the
    /// stored content is not a JSON object.  Providers require an object.
    pub fn tool_use_args(&self) -> Value {
        match serde_json::from_str::<Value>(&self.content) {
            Ok(v) if v.is_object() => v,
            _ => Value::Object(Default::default()),
        }
    }
}

/// A tool schema offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
    /// Safe tools execute without approval.
    #[serde(default)]
    pub safe: bool,
}

/// A completed tool invocation request from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub args: Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

// ─── Normalized stream events ────────────────────────────────────────────────

/// Provider-neutral event produced by the SSE parser.
///
/// This is the C-level contract between the wire parsers and the tool-call
/// assembler: one `StreamEvent` per meaningful SSE payload, independent of
/// how the provider frames it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta {
        content: String,
    },
    ReasoningDelta {
        content: String,
        done: bool,
    },
    /// A fragment of a (possibly parallel) tool call.  `index` is the stable
    /// accumulator key; `id` and `name` may arrive in any fragment.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        args_fragment: Option<String>,
    },
    /// The provider signalled the end of tool-call emission for this turn.
    ToolCallEnd {
        finish_reason: String,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        total_tokens: u32,
    },
    Error {
        message: String,
    },
    End,
}

/// Per-stream accumulator for one partial tool call, keyed by `index`.
#[derive(Debug, Clone, Default)]
pub struct PartialCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub args_buf: String,
}

/// Assembled event stream consumed by the orchestrator: text tokens,
/// reasoning, completed tool calls, usage, and the end-of-turn marker.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Token(String),
    Reasoning { text: String, done: bool },
    Call(ToolCall),
    Usage(Usage),
    Done,
}

/// Token usage for one model turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(m.tool_id.is_none());
    }

    #[test]
    fn tool_use_records_args_as_content() {
        let m = Message::tool_use("call_1", "read_file", &json!({"path": "a.rs"}));
        assert!(m.is_tool_use());
        assert_eq!(m.name.as_deref(), Some("read_file"));
        assert_eq!(m.tool_use_args(), json!({"path": "a.rs"}));
    }

    #[test]
    fn tool_use_args_default_to_empty_object() {
        let mut m = Message::tool_use("c", "t", &json!({}));
        m.content = "not json".into();
        assert_eq!(m.tool_use_args(), json!({}));
        m.content = "[1,2]".into();
        assert_eq!(m.tool_use_args(), json!({}), "non-object args are rejected");
    }

    #[test]
    fn tool_result_carries_matching_id() {
        let m = Message::tool_result("call_1", "read_file", "contents");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_id.as_deref(), Some("call_1"));
        assert!(!m.is_tool_use());
    }

    #[test]
    fn plain_assistant_is_not_tool_use() {
        assert!(!Message::assistant("hi").is_tool_use());
    }

    #[test]
    fn message_serializes_without_empty_optionals() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(!json.contains("tool_id"), "{json}");
        assert!(!json.contains("name"), "{json}");
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::tool_result("id-1", "shell", "output");
        let text = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back.role, Role::Tool);
        assert_eq!(back.tool_id.as_deref(), Some("id-1"));
        assert_eq!(back.content, "output");
    }

    #[test]
    fn role_as_str_matches_wire_names() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::Tool.as_str(), "tool");
    }
}
