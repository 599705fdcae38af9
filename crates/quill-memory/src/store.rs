// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use quill_model::Message;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::conversation::{title_from_messages, Conversation};

/// One line of a conversation file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line {
    /// First line of every file; carries identity and creation time so an
    /// empty conversation is still loadable.
    Meta { id: String, created_at: DateTime<Utc> },
    Message {
        ts: DateTime<Utc>,
        #[serde(flatten)]
        msg: Message,
    },
}

/// Listing entry for the conversation picker.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Durable per-project conversation store.
///
/// Layout: `<root>/<project-id>/conversations/<conversation-id>.jsonl`, one
/// JSON record per line, appended and synced before any mutation returns.
/// The project id is a stable hash of the workspace path so stores survive
/// renames of nothing but the window title.
pub struct ConversationStore {
    project_dir: PathBuf,
}

/// Stable id for a workspace path.
pub fn project_id(workspace: &Path) -> String {
    let digest = Sha256::digest(workspace.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

/// Default store root: `~/.local/share/quill/projects`.
pub fn default_store_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill/projects")
}

impl ConversationStore {
    pub fn open(root: &Path, workspace: &Path) -> anyhow::Result<Self> {
        let project_dir = root.join(project_id(workspace));
        std::fs::create_dir_all(project_dir.join("conversations"))
            .with_context(|| format!("creating {}", project_dir.display()))?;
        Ok(Self { project_dir })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn conversations_dir(&self) -> PathBuf {
        self.project_dir.join("conversations")
    }

    fn file_for(&self, id: &str) -> PathBuf {
        self.conversations_dir().join(format!("{id}.jsonl"))
    }

    /// Create a fresh conversation, reaping empty shells first so repeated
    /// `new_conversation` calls do not accumulate orphans.  The new
    /// conversation becomes current.
    pub fn create(&self) -> anyhow::Result<Conversation> {
        self.reap_empty()?;
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let line = Line::Meta { id: id.clone(), created_at };
        self.append_line(&id, &line)?;
        self.set_current(&id)?;
        debug!(conversation = %id, "conversation created");
        Ok(Conversation::new(id, created_at))
    }

    /// Append one message durably; returns only after the line is synced.
    pub fn append(&self, id: &str, msg: &Message) -> anyhow::Result<()> {
        let line = Line::Message { ts: Utc::now(), msg: msg.clone() };
        self.append_line(id, &line)
    }

    fn append_line(&self, id: &str, line: &Line) -> anyhow::Result<()> {
        let path = self.file_for(id);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut text = serde_json::to_string(line).context("serializing record")?;
        text.push('\n');
        file.write_all(text.as_bytes())
            .and_then(|_| file.sync_all())
            .with_context(|| format!("appending to {}", path.display()))?;
        Ok(())
    }

    /// Load a conversation by id.
    pub fn load(&self, id: &str) -> anyhow::Result<Conversation> {
        let path = self.file_for(id);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut conv: Option<Conversation> = None;
        for (n, raw) in text.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            let line: Line = serde_json::from_str(raw)
                .with_context(|| format!("parsing {}:{}", path.display(), n + 1))?;
            match line {
                Line::Meta { id, created_at } => {
                    conv.get_or_insert_with(|| Conversation::new(id, created_at));
                }
                Line::Message { ts, msg } => {
                    let c = conv.get_or_insert_with(|| {
                        Conversation::new(id.to_string(), ts)
                    });
                    c.messages.push(msg);
                    c.updated_at = ts;
                }
            }
        }
        conv.ok_or_else(|| anyhow::anyhow!("conversation {id} is empty on disk"))
    }

    /// List all conversations, most recently updated first.
    pub fn list(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        let mut out = Vec::new();
        let dir = self.conversations_dir();
        for entry in std::fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let conv = match self.load(id) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(conversation = id, error = %e, "skipping unreadable conversation");
                    continue;
                }
            };
            out.push(ConversationSummary {
                id: conv.id.clone(),
                title: title_from_messages(&conv.messages),
                created_at: conv.created_at,
                updated_at: conv.updated_at,
                message_count: conv.messages.len(),
            });
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    /// Remove conversations that never received a message.
    fn reap_empty(&self) -> anyhow::Result<()> {
        for summary in self.list()? {
            if summary.message_count == 0 {
                let path = self.file_for(&summary.id);
                debug!(conversation = %summary.id, "reaping empty conversation");
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }

    // ── Current-conversation pointer ─────────────────────────────────────────

    pub fn set_current(&self, id: &str) -> anyhow::Result<()> {
        let path = self.project_dir.join("current");
        std::fs::write(&path, id).with_context(|| format!("writing {}", path.display()))
    }

    pub fn current_id(&self) -> Option<String> {
        let id = std::fs::read_to_string(self.project_dir.join("current")).ok()?;
        let id = id.trim().to_string();
        if id.is_empty() || !self.file_for(&id).exists() {
            return None;
        }
        Some(id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
