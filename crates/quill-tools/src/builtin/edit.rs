// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! File editing tools.  `edit_file` only plans — it turns a high-level edit
//! intent into a diff preview for the approval prompt.  `apply_edit` replans
//! from the same arguments and performs the write; the orchestrator
//! dispatches it automatically once the plan is approved.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::EditSafetySettings;
use quill_edit::{AnchorSpec, EditPlan, Planner};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Build the plan described by an `edit_file` / `apply_edit` argument object.
///
/// Errors come back as `CODE: message` strings so the model sees the typed
/// validation code alongside the explanation.
fn build_plan(planner: &Planner, args: &Value) -> Result<EditPlan, String> {
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str);
    let int_arg = |key: &str| args.get(key).and_then(Value::as_i64);
    let require_int = |key: &str| {
        int_arg(key).ok_or_else(|| format!("missing required integer parameter: {key}"))
    };

    let action = str_arg("action").ok_or("missing required parameter: action")?;
    let path = str_arg("path").ok_or("missing required parameter: path")?;
    let content = str_arg("content").unwrap_or("");

    let result = match action {
        "create" => planner.create(path, content),
        "replace_lines" => {
            planner.replace_lines(path, require_int("start")?, require_int("end")?, content)
        }
        "insert_before" => planner.insert_before(path, require_int("line")?, content),
        "insert_after" => planner.insert_after(path, require_int("line")?, content),
        "delete_lines" => planner.delete_lines(path, require_int("start")?, require_int("end")?),
        "delete_file" => planner.delete_file(path),
        "search_replace" => {
            planner.search_replace(path, str_arg("old").unwrap_or(""), str_arg("new").unwrap_or(""))
        }
        "anchor_replace" => {
            let spec: AnchorSpec = serde_json::from_value(args.clone())
                .map_err(|e| format!("invalid anchor_replace arguments: {e}"))?;
            planner.anchor_replace(path, &spec)
        }
        other => return Err(format!("unknown edit action: {other:?}")),
    };
    result.map_err(|e| format!("{}: {e}", e.code()))
}

fn parameters_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "File path inside the workspace"
            },
            "action": {
                "type": "string",
                "enum": [
                    "create", "replace_lines", "insert_before", "insert_after",
                    "delete_lines", "delete_file", "search_replace", "anchor_replace"
                ],
                "description": "Kind of edit to plan"
            },
            "content": {
                "type": "string",
                "description": "New content (create, replace, insert, anchor_replace)"
            },
            "start": { "type": "integer", "description": "First line, 1-indexed inclusive" },
            "end": { "type": "integer", "description": "Last line, 1-indexed inclusive" },
            "line": { "type": "integer", "description": "Reference line for inserts, 1-indexed" },
            "old": { "type": "string", "description": "Exact string to replace (search_replace)" },
            "new": { "type": "string", "description": "Replacement string (search_replace)" },
            "anchor_before": { "type": "string", "description": "Fragment starting the edit window (anchor_replace)" },
            "anchor_after": { "type": "string", "description": "Fragment ending the edit window, preserved (anchor_replace)" },
            "target": { "type": "string", "description": "Fragment replaced inside the window (anchor_replace)" },
            "normalize_whitespace": { "type": "boolean", "description": "Collapse space/tab runs before matching" },
            "fuzzy_threshold": { "type": "number", "description": "Fuzzy target matching, 1.0 = exact only" },
            "occurrence": { "type": "integer", "description": "Which anchor_before occurrence delimits the window (1-based)" }
        },
        "required": ["path", "action"],
        "additionalProperties": false
    })
}

pub struct EditFileTool {
    pub planner: Arc<Planner>,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Plan a file edit and present its diff for approval.\n\
         Actions: create, replace_lines, insert_before, insert_after, delete_lines,\n\
         delete_file, search_replace, anchor_replace.  Line numbers are 1-indexed\n\
         inclusive.  search_replace requires a unique match; use anchor_replace with\n\
         anchors for multi-site or position-sensitive edits.  Nothing is written\n\
         until the plan is approved."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema()
    }

    fn safe(&self) -> bool {
        false
    }

    fn apply_counterpart(&self) -> Option<&'static str> {
        Some("apply_edit")
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        match build_plan(&self.planner, &call.args) {
            Ok(plan) => {
                debug!(path = %plan.path.display(), "edit_file planned");
                let summary = if plan.is_deletion {
                    format!("planned deletion of {}", plan.path.display())
                } else if plan.is_creation {
                    format!("planned creation of {}", plan.path.display())
                } else {
                    format!("planned edit to {}", plan.path.display())
                };
                ToolOutput::ok(&call.id, summary).with_diff(plan.diff)
            }
            Err(msg) => ToolOutput::err(&call.id, msg),
        }
    }
}

pub struct ApplyEditTool {
    pub planner: Arc<Planner>,
    pub safety: EditSafetySettings,
}

#[async_trait]
impl Tool for ApplyEditTool {
    fn name(&self) -> &str {
        "apply_edit"
    }

    fn description(&self) -> &str {
        "Apply a previously planned file edit.  Takes the same arguments as\n\
         edit_file; dispatched automatically after an edit is approved."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema()
    }

    fn safe(&self) -> bool {
        false
    }

    fn apply_counterpart(&self) -> Option<&'static str> {
        // A direct model call still goes through approval, then lands back
        // here for the effect phase.
        Some("apply_edit")
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        // Preview only; the effect phase is `apply`.
        match build_plan(&self.planner, &call.args) {
            Ok(plan) => ToolOutput::ok(&call.id, format!("planned edit to {}", plan.path.display()))
                .with_diff(plan.diff),
            Err(msg) => ToolOutput::err(&call.id, msg),
        }
    }

    async fn apply(&self, call: &ToolCall) -> ToolOutput {
        let plan = match build_plan(&self.planner, &call.args) {
            Ok(p) => p,
            Err(msg) => return ToolOutput::err(&call.id, msg),
        };
        let path = plan.path.clone();
        let diff = plan.diff.clone();
        let deleted = plan.is_deletion;
        match quill_edit::apply(plan, &self.safety) {
            Ok(outcome) => {
                let summary = if deleted {
                    format!("deleted {}", path.display())
                } else {
                    format!("applied edit to {}", path.display())
                };
                let mut out = ToolOutput::ok(&call.id, summary).with_diff(diff);
                out.warnings = outcome.warnings;
                out
            }
            Err(e) => ToolOutput::err(&call.id, format!("apply failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, EditFileTool, ApplyEditTool) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let planner = Arc::new(Planner::new(dir.path()).unwrap());
        let safety: EditSafetySettings = serde_yaml::from_str("{}").unwrap();
        (
            dir,
            EditFileTool { planner: Arc::clone(&planner) },
            ApplyEditTool { planner, safety },
        )
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "e1".into(), name: "edit_file".into(), args }
    }

    #[tokio::test]
    async fn plan_produces_diff_without_writing() {
        let (d, edit, _) = setup(&[("main.rs", "fn main() {}\n")]);
        let out = edit
            .plan(&call(json!({
                "path": "main.rs", "action": "replace_lines",
                "start": 1, "end": 1, "content": "fn main() { run(); }"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.diff.as_deref().unwrap_or("").contains("+ fn main() { run(); }"));
        // Nothing written yet.
        assert_eq!(std::fs::read_to_string(d.path().join("main.rs")).unwrap(), "fn main() {}\n");
    }

    #[tokio::test]
    async fn apply_writes_the_planned_content() {
        let (d, _, apply) = setup(&[("main.rs", "old\n")]);
        let args = json!({"path": "main.rs", "action": "replace_lines", "start": 1, "end": 1, "content": "new"});
        let out = apply.apply(&call(args)).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(d.path().join("main.rs")).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn validation_code_is_surfaced() {
        let (_d, edit, _) = setup(&[("f.txt", "a\n")]);
        let out = edit
            .plan(&call(json!({"path": "f.txt", "action": "replace_lines", "start": 0, "end": 1, "content": "x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("INVALID_RANGE:"), "{}", out.content);
    }

    #[tokio::test]
    async fn traversal_is_surfaced_with_code() {
        let (_d, edit, _) = setup(&[]);
        let out = edit
            .plan(&call(json!({"path": "../../etc/passwd", "action": "create", "content": "x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("PATH_TRAVERSAL:"), "{}", out.content);
    }

    #[tokio::test]
    async fn unknown_action_is_error() {
        let (_d, edit, _) = setup(&[]);
        let out = edit.plan(&call(json!({"path": "x", "action": "teleport"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown edit action"));
    }

    #[tokio::test]
    async fn missing_line_numbers_are_reported() {
        let (_d, edit, _) = setup(&[("f.txt", "a\n")]);
        let out = edit
            .plan(&call(json!({"path": "f.txt", "action": "replace_lines", "content": "x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("start"), "{}", out.content);
    }

    #[tokio::test]
    async fn anchor_replace_arguments_pass_through() {
        let (_d, edit, _) = setup(&[("conf.json", "{\n    \"number\": 123\n}")]);
        let out = edit
            .plan(&call(json!({
                "path": "conf.json",
                "action": "anchor_replace",
                "anchor_before": "    \"number\": 123",
                "anchor_after": "}",
                "content": "    \"number\": 123,\n    \"story\": \"x\"\n"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.diff.as_deref().unwrap_or("").contains("story"));
    }

    #[tokio::test]
    async fn apply_deletion_removes_file() {
        let (d, _, apply) = setup(&[("gone.txt", "x\n")]);
        let out = apply
            .apply(&call(json!({"path": "gone.txt", "action": "delete_file"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(!d.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn suspicious_content_warns_on_apply() {
        let (_d, _, apply) = setup(&[]);
        let out = apply
            .apply(&call(json!({"path": "env.sh", "action": "create", "content": "token=abc\n"})))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn edit_file_counterpart_is_apply_edit() {
        let (_d, edit, apply) = setup(&[]);
        assert_eq!(edit.apply_counterpart(), Some("apply_edit"));
        assert_eq!(apply.apply_counterpart(), Some("apply_edit"));
        assert!(!edit.safe());
    }
}
