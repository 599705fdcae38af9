// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use quill_edit::resolve_in_workspace;

use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ListDirTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the workspace root (default: the root itself)"
                }
            },
            "additionalProperties": false
        })
    }

    fn safe(&self) -> bool {
        true
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let raw = call.args.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = match resolve_in_workspace(&self.workspace_root, raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, format!("{}: {e}", e.code())),
        };

        let mut entries = match std::fs::read_dir(&path) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    if e.path().is_dir() {
                        format!("{name}/")
                    } else {
                        name
                    }
                })
                .collect::<Vec<_>>(),
            Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
        };
        entries.sort();
        if entries.is_empty() {
            return ToolOutput::ok(&call.id, "(empty directory)");
        }
        ToolOutput::ok(&call.id, entries.join("\n"))
    }
}
