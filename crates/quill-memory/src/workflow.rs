// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only workflow log: the audit trail of tool activity and approval
//! decisions for one project.  Recording failures are logged and swallowed —
//! an unwritable audit line must never stall the agent loop.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    ToolUse,
    ToolResult,
    Approval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: WorkflowKind,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

pub struct WorkflowRecorder {
    path: PathBuf,
}

impl WorkflowRecorder {
    /// Events append to `<project_dir>/workflow.jsonl`.
    pub fn new(project_dir: &std::path::Path) -> Self {
        Self { path: project_dir.join("workflow.jsonl") }
    }

    pub fn tool_use(&self, tool: &str, id: &str, summary: impl Into<String>) {
        self.record(WorkflowEvent {
            timestamp: Utc::now(),
            kind: WorkflowKind::ToolUse,
            tool: tool.to_string(),
            status: None,
            id: id.to_string(),
            summary: Some(summary.into()),
        });
    }

    pub fn tool_result(&self, tool: &str, id: &str, ok: bool) {
        self.record(WorkflowEvent {
            timestamp: Utc::now(),
            kind: WorkflowKind::ToolResult,
            tool: tool.to_string(),
            status: Some(if ok { "ok".into() } else { "error".into() }),
            id: id.to_string(),
            summary: None,
        });
    }

    pub fn approval(&self, tool: &str, id: &str, approved: bool) {
        self.record(WorkflowEvent {
            timestamp: Utc::now(),
            kind: WorkflowKind::Approval,
            tool: tool.to_string(),
            status: Some(if approved { "approved".into() } else { "rejected".into() }),
            id: id.to_string(),
            summary: None,
        });
    }

    /// Protocol violations are recorded at fatal severity so the audit
    /// trail explains an aborted turn.
    pub fn fatal(&self, tool: &str, id: &str, summary: impl Into<String>) {
        self.record(WorkflowEvent {
            timestamp: Utc::now(),
            kind: WorkflowKind::ToolResult,
            tool: tool.to_string(),
            status: Some("fatal".into()),
            id: id.to_string(),
            summary: Some(summary.into()),
        });
    }

    pub fn record(&self, event: WorkflowEvent) {
        if let Err(e) = self.try_record(&event) {
            warn!(path = %self.path.display(), error = %e, "workflow event dropped");
        }
    }

    fn try_record(&self, event: &WorkflowEvent) -> anyhow::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Parse the full log; unparseable lines are skipped.
    pub fn read_all(&self) -> Vec<WorkflowEvent> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (tempfile::TempDir, WorkflowRecorder) {
        let dir = tempfile::tempdir().unwrap();
        let rec = WorkflowRecorder::new(dir.path());
        (dir, rec)
    }

    #[test]
    fn events_append_in_order() {
        let (_d, rec) = recorder();
        rec.tool_use("read_file", "c1", "read src/main.rs");
        rec.tool_result("read_file", "c1", true);
        rec.approval("edit_file", "c2", false);

        let events = rec.read_all();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, WorkflowKind::ToolUse);
        assert_eq!(events[1].status.as_deref(), Some("ok"));
        assert_eq!(events[2].status.as_deref(), Some("rejected"));
    }

    #[test]
    fn failed_tool_result_is_marked_error() {
        let (_d, rec) = recorder();
        rec.tool_result("run_shell", "c9", false);
        let events = rec.read_all();
        assert_eq!(events[0].status.as_deref(), Some("error"));
        assert_eq!(events[0].id, "c9");
    }

    #[test]
    fn kind_serializes_as_snake_case_type_field() {
        let (_d, rec) = recorder();
        rec.tool_use("run_shell", "c1", "ls");
        let raw = std::fs::read_to_string(rec.path.clone()).unwrap();
        assert!(raw.contains("\"type\":\"tool_use\""), "{raw}");
    }

    #[test]
    fn recording_failure_is_swallowed() {
        // Point at a directory that cannot exist as a file.
        let dir = tempfile::tempdir().unwrap();
        let rec = WorkflowRecorder { path: dir.path().to_path_buf() };
        rec.tool_use("x", "y", "z");
        assert!(rec.read_all().is_empty());
    }

    #[test]
    fn fatal_events_carry_fatal_status() {
        let (_d, rec) = recorder();
        rec.fatal("conversation", "t1", "tool result without parent");
        let events = rec.read_all();
        assert_eq!(events[0].status.as_deref(), Some("fatal"));
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let (_d, rec) = recorder();
        rec.tool_use("a", "b", "c");
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&rec.path).unwrap();
            writeln!(f, "not json").unwrap();
        }
        rec.tool_result("a", "b", true);
        assert_eq!(rec.read_all().len(), 2);
    }
}
