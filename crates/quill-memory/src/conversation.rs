// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use quill_model::{Message, Role};

/// Maximum characters of the first user message used as the display title.
const TITLE_MAX_CHARS: usize = 60;

/// In-memory conversation: a stable id plus an ordered message list.
///
/// Mutation is append-only with one exception: the in-progress assistant
/// stream is materialized as a single tail message that
/// [`Conversation::replace_streaming_tail`] overwrites until the turn
/// completes.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at: created_at,
            messages: Vec::new(),
        }
    }

    /// Human-readable title: the first user line, truncated.
    pub fn title(&self) -> String {
        title_from_messages(&self.messages)
    }

    /// True when no messages have been appended (a reapable shell).
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, msg: Message) {
        self.updated_at = Utc::now();
        self.messages.push(msg);
    }

    /// Overwrite the streaming assistant tail with the accumulated `text`,
    /// appending a fresh tail when the last message is not a plain
    /// assistant message.
    pub fn replace_streaming_tail(&mut self, text: &str) {
        self.updated_at = Utc::now();
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant && last.tool_id.is_none() => {
                last.content = text.to_string();
            }
            _ => self.messages.push(Message::assistant(text)),
        }
    }

    /// Read-only copy handed to the UI between turns.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// True when `tool_id` was declared by a preceding assistant tool_use.
    /// A tool result without such a parent violates the conversation
    /// protocol.
    pub fn has_tool_use(&self, tool_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.is_tool_use() && m.tool_id.as_deref() == Some(tool_id))
    }
}

pub(crate) fn title_from_messages(messages: &[Message]) -> String {
    let first_user = messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.lines().next().unwrap_or("").trim())
        .filter(|s| !s.is_empty());
    match first_user {
        Some(line) => {
            if line.chars().count() > TITLE_MAX_CHARS {
                let truncated: String = line.chars().take(TITLE_MAX_CHARS - 1).collect();
                format!("{truncated}…")
            } else {
                line.to_string()
            }
        }
        None => "New conversation".to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
