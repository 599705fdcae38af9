// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_edit::resolve_in_workspace;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Lines returned when no explicit limit is given.
const DEFAULT_LIMIT: usize = 2000;

pub struct ReadFileTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace and return its content with line numbers.\n\
         Use offset/limit to page through large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root (absolute paths must stay inside it)"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed first line to return (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 2000)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn safe(&self) -> bool {
        true
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let raw = match call.args.get("path").and_then(Value::as_str) {
            Some(p) if !p.is_empty() => p,
            _ => return ToolOutput::err(&call.id, "missing required parameter: path"),
        };
        let path = match resolve_in_workspace(&self.workspace_root, raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, format!("{}: {e}", e.code())),
        };
        let offset = call.args.get("offset").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let limit = call.args.get("limit").and_then(Value::as_u64).unwrap_or(DEFAULT_LIMIT as u64)
            as usize;

        debug!(path = %path.display(), offset, limit, "read_file tool");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let total = content.lines().count();
        let mut out = String::new();
        for (i, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
            out.push_str(&format!("{:>5}  {line}\n", i + 1));
        }
        if offset - 1 + limit < total {
            out.push_str(&format!(
                "… {} more line(s); continue with offset={}\n",
                total - (offset - 1 + limit),
                offset + limit
            ));
        }
        if out.is_empty() {
            out = "(empty file)".into();
        }
        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
