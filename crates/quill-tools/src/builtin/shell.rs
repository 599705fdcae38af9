// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shell execution, split like the edit tools: `run_shell` plans (command
//! preview for the approval prompt), `apply_shell` executes after approval.
//! Commands are confined to the workspace directory and a timeout; that is
//! the whole sandbox.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Hard ceiling on any requested timeout.
const MAX_TIMEOUT_SECS: u64 = 600;

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Lines kept from the head / tail of oversized output.  Errors and
/// summaries cluster at the end of build output, so the tail matters as
/// much as the head.
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "command": {
                "type": "string",
                "description": "Bash one-liner to execute in the workspace directory"
            },
            "timeout_secs": {
                "type": "integer",
                "description": "Execution timeout in seconds (default 60, capped at 600)"
            }
        },
        "required": ["command"],
        "additionalProperties": false
    })
}

fn effective_timeout(args: &Value, default_secs: u64) -> u64 {
    args.get("timeout_secs")
        .and_then(Value::as_u64)
        .unwrap_or(default_secs)
        .min(MAX_TIMEOUT_SECS)
}

fn command_arg(call: &ToolCall) -> Result<String, ToolOutput> {
    match call.args.get("command").and_then(Value::as_str) {
        Some(c) if !c.is_empty() => Ok(c.to_string()),
        _ => Err(ToolOutput::err(&call.id, "missing required parameter: command")),
    }
}

fn command_plan(command: &str, workdir: &std::path::Path, timeout: u64) -> String {
    format!("$ {command}\nworkdir: {}\ntimeout: {timeout}s", workdir.display())
}

async fn run_command(
    call_id: &str,
    command: &str,
    workdir: &std::path::Path,
    timeout_secs: u64,
) -> ToolOutput {
    debug!(cmd = %command, timeout_secs, "executing shell command");

    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);
    cmd.current_dir(workdir);
    // No terminal for the child: stdin from /dev/null and a fresh session
    // so it cannot open /dev/tty behind the host's back.  kill_on_drop
    // guarantees the process dies with the timed-out future.
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let result =
        tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output()).await;

    match result {
        Ok(Ok(output)) => {
            let mut content = String::new();
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stdout.is_empty() {
                content.push_str(&head_tail_truncate(&stdout));
            }
            if !stderr.is_empty() {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str("[stderr]\n");
                content.push_str(&head_tail_truncate(&stderr));
            }

            let code = output.status.code().unwrap_or(-1);
            if content.is_empty() {
                content = format!("[exit {code}]");
            }
            if code == 0 {
                ToolOutput::ok(call_id, content)
            } else if code == 1 {
                // Exit 1 is "no matches" for grep-alikes and "false" for
                // test; flagging it as an error misleads the model.
                ToolOutput::ok(call_id, format!("[exit 1]\n{content}"))
            } else {
                ToolOutput::err(call_id, format!("[exit {code}]\n{content}"))
            }
        }
        Ok(Err(e)) => ToolOutput::err(call_id, format!("spawn error: {e}")),
        Err(_) => ToolOutput::err(call_id, format!("timeout after {timeout_secs}s")),
    }
}

/// Keep the first and last lines of oversized output with an omission
/// marker in between, so command preamble and the trailing errors both
/// survive truncation.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();
    if total <= HEAD_LINES + TAIL_LINES {
        // Few but very long lines: byte-level head+tail.
        let head = &s[..OUTPUT_LIMIT_BYTES / 2];
        let tail = &s[s.len() - OUTPUT_LIMIT_BYTES / 2..];
        let omitted = s.len() - head.len() - tail.len();
        return format!("{head}\n...[{omitted} bytes omitted]...\n{tail}");
    }
    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    format!("{head}\n...[{omitted_lines} lines omitted]...\n{tail}")
}

pub struct RunShellTool {
    pub workspace_root: PathBuf,
    pub default_timeout_secs: u64,
}

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Propose a shell command for approval.  The command runs in the\n\
         workspace directory with a timeout (default 60 s, max 600 s) once\n\
         approved.  Output is capped at ~20 KB keeping the first and last\n\
         100 lines.  Prefer non-interactive commands."
    }

    fn parameters_schema(&self) -> Value {
        schema()
    }

    fn safe(&self) -> bool {
        false
    }

    fn apply_counterpart(&self) -> Option<&'static str> {
        Some("apply_shell")
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let command = match command_arg(call) {
            Ok(c) => c,
            Err(out) => return out,
        };
        let timeout = effective_timeout(&call.args, self.default_timeout_secs);
        ToolOutput::ok(&call.id, format!("run_shell: {command}"))
            .with_diff(command_plan(&command, &self.workspace_root, timeout))
    }
}

pub struct ApplyShellTool {
    pub workspace_root: PathBuf,
    pub default_timeout_secs: u64,
}

#[async_trait]
impl Tool for ApplyShellTool {
    fn name(&self) -> &str {
        "apply_shell"
    }

    fn description(&self) -> &str {
        "Execute an approved shell command.  Takes the same arguments as\n\
         run_shell; dispatched automatically after approval."
    }

    fn parameters_schema(&self) -> Value {
        schema()
    }

    fn safe(&self) -> bool {
        false
    }

    fn apply_counterpart(&self) -> Option<&'static str> {
        Some("apply_shell")
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let command = match command_arg(call) {
            Ok(c) => c,
            Err(out) => return out,
        };
        let timeout = effective_timeout(&call.args, self.default_timeout_secs);
        ToolOutput::ok(&call.id, format!("run_shell: {command}"))
            .with_diff(command_plan(&command, &self.workspace_root, timeout))
    }

    async fn apply(&self, call: &ToolCall) -> ToolOutput {
        let command = match command_arg(call) {
            Ok(c) => c,
            Err(out) => return out,
        };
        let timeout = effective_timeout(&call.args, self.default_timeout_secs);
        run_command(&call.id, &command, &self.workspace_root, timeout).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools() -> (tempfile::TempDir, RunShellTool, ApplyShellTool) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (
            dir,
            RunShellTool { workspace_root: root.clone(), default_timeout_secs: 60 },
            ApplyShellTool { workspace_root: root, default_timeout_secs: 60 },
        )
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "sh1".into(), name: "run_shell".into(), args }
    }

    // ── Planning ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn plan_previews_command_without_running_it() {
        let (d, run, _) = tools();
        let marker = d.path().join("should_not_exist");
        let out = run
            .plan(&call(json!({"command": format!("touch {}", marker.display())})))
            .await;
        assert!(!out.is_error);
        assert!(out.diff.as_deref().unwrap().starts_with("$ touch"));
        assert!(!marker.exists(), "plan must not execute");
    }

    #[tokio::test]
    async fn plan_missing_command_is_error() {
        let (_d, run, _) = tools();
        let out = run.plan(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("command"));
    }

    #[tokio::test]
    async fn requested_timeout_is_capped() {
        let (_d, run, _) = tools();
        let out = run
            .plan(&call(json!({"command": "true", "timeout_secs": 9999})))
            .await;
        assert!(out.diff.as_deref().unwrap().contains("timeout: 600s"));
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn apply_runs_in_workspace_directory() {
        let (_d, _, apply) = tools();
        let out = apply.apply(&call(json!({"command": "pwd"}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(
            out.content.trim(),
            apply.workspace_root.to_string_lossy(),
            "command must run in the workspace root"
        );
    }

    #[tokio::test]
    async fn stdout_and_stderr_both_captured() {
        let (_d, _, apply) = tools();
        let out = apply
            .apply(&call(json!({"command": "echo out && echo err >&2"})))
            .await;
        assert!(out.content.contains("out"));
        assert!(out.content.contains("[stderr]"));
        assert!(out.content.contains("err"));
    }

    #[tokio::test]
    async fn timeout_surfaces_as_tool_error() {
        let (_d, _, apply) = tools();
        let out = apply
            .apply(&call(json!({"command": "sleep 10", "timeout_secs": 1})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout after 1s"), "{}", out.content);
    }

    #[tokio::test]
    async fn exit_one_is_not_an_error() {
        let (_d, _, apply) = tools();
        let out = apply.apply(&call(json!({"command": "exit 1"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn exit_two_is_an_error() {
        let (_d, _, apply) = tools();
        let out = apply.apply(&call(json!({"command": "exit 2"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 2]"));
    }

    // ── Truncation ────────────────────────────────────────────────────────────

    #[test]
    fn short_output_passes_through() {
        assert_eq!(head_tail_truncate("hello\n"), "hello\n");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let mut lines = vec!["FIRST".to_string()];
        for i in 0..800 {
            lines.push(format!("middle {i} padding padding padding padding"));
        }
        lines.push("LAST".to_string());
        let out = head_tail_truncate(&lines.join("\n"));
        assert!(out.contains("FIRST"));
        assert!(out.contains("LAST"));
        assert!(out.contains("omitted"));
        assert!(out.len() < lines.join("\n").len());
    }
}
