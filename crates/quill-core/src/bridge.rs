// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use quill_model::Role;

/// Events the core pushes to the user interface.
///
/// Implementations live outside the core (graphical shell, terminal REPL,
/// test harness).  Methods take `&self` and must not block: the orchestrator
/// calls them from inside its turn loop.
pub trait UiBridge: Send + Sync {
    /// A message was appended to the conversation.
    fn chat_new(&self, role: Role, content: &str);
    /// Streaming content for the current assistant turn; replaces the tail.
    fn assistant_stream(&self, content: &str);
    /// Reasoning stream; `done` collapses the block.
    fn assistant_reasoning(&self, text: &str, done: bool);
    /// Reset the conversation view.
    fn chat_clear(&self);
    /// An approval decision is needed; answer via `Orchestrator::approve`.
    fn approval_prompt(&self, id: &str, summary: &str, diff: Option<&str>);
    /// Busy indicator; exactly one `false` follows every `true`.
    fn busy(&self, busy: bool);
    /// Hint that `path` is being worked on and worth opening in the editor.
    fn open_file(&self, path: &str);
    /// Out-of-band status line (errors, bound overruns, safety warnings).
    fn system_notice(&self, text: &str);
    /// Token usage after a model turn.
    fn usage(&self, _input_tokens: u32, _output_tokens: u32, _total_tokens: u32) {}
}

/// Bridge that records every event, for tests and headless inspection.
#[derive(Default)]
pub struct RecordingBridge {
    events: Mutex<Vec<UiEvent>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ChatNew { role: Role, content: String },
    AssistantStream(String),
    AssistantReasoning { text: String, done: bool },
    ChatClear,
    ApprovalPrompt { id: String, summary: String, diff: Option<String> },
    Busy(bool),
    OpenFile(String),
    SystemNotice(String),
    Usage { input_tokens: u32, output_tokens: u32, total_tokens: u32 },
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, ev: UiEvent) {
        self.events.lock().unwrap().push(ev);
    }
}

impl UiBridge for RecordingBridge {
    fn chat_new(&self, role: Role, content: &str) {
        self.push(UiEvent::ChatNew { role, content: content.to_string() });
    }
    fn assistant_stream(&self, content: &str) {
        self.push(UiEvent::AssistantStream(content.to_string()));
    }
    fn assistant_reasoning(&self, text: &str, done: bool) {
        self.push(UiEvent::AssistantReasoning { text: text.to_string(), done });
    }
    fn chat_clear(&self) {
        self.push(UiEvent::ChatClear);
    }
    fn approval_prompt(&self, id: &str, summary: &str, diff: Option<&str>) {
        self.push(UiEvent::ApprovalPrompt {
            id: id.to_string(),
            summary: summary.to_string(),
            diff: diff.map(String::from),
        });
    }
    fn busy(&self, busy: bool) {
        self.push(UiEvent::Busy(busy));
    }
    fn open_file(&self, path: &str) {
        self.push(UiEvent::OpenFile(path.to_string()));
    }
    fn system_notice(&self, text: &str) {
        self.push(UiEvent::SystemNotice(text.to_string()));
    }
    fn usage(&self, input_tokens: u32, output_tokens: u32, total_tokens: u32) {
        self.push(UiEvent::Usage { input_tokens, output_tokens, total_tokens });
    }
}
