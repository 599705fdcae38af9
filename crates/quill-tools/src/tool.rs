// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

pub use quill_model::ToolCall;

/// The result of one tool phase.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content shown to the model and the UI.
    pub content: String,
    /// Preview attached by unsafe tools: a unified diff for edits, a
    /// command plan for shell invocations.
    pub diff: Option<String>,
    /// Warnings raised by safety heuristics; surfaced to the UI, never
    /// blocking.
    pub warnings: Vec<String>,
    /// True when the phase failed non-fatally (message in `content`).
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            diff: None,
            warnings: Vec::new(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            diff: None,
            warnings: Vec::new(),
            is_error: true,
        }
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }
}

/// One workspace tool.
///
/// Execution is split in two phases.  `plan` never performs side effects: for
/// safe tools it IS the execution (reads are effect-free), for unsafe tools
/// it produces the preview shown in the approval prompt.  `apply` performs
/// the side effect and is only ever dispatched after an approval decision;
/// the default implementation re-runs `plan` for tools without one.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Safe tools execute without approval.
    fn safe(&self) -> bool;
    /// Tool dispatched automatically once this tool's plan is approved
    /// (e.g. `edit_file` → `apply_edit`).  `None` means approval alone
    /// completes the call.
    fn apply_counterpart(&self) -> Option<&'static str> {
        None
    }
    async fn plan(&self, call: &ToolCall) -> ToolOutput;
    async fn apply(&self, call: &ToolCall) -> ToolOutput {
        self.plan(call).await
    }
}

/// Path mentioned in a call's arguments, used for the open-file UI hint.
/// Accepts `path` and its `file` alias.
pub fn path_hint(args: &Value) -> Option<String> {
    args.get("path")
        .or_else(|| args.get("file"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
