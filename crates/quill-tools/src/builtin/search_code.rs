// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_edit::resolve_in_workspace;

use crate::indexer::Indexer;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct SearchCodeTool {
    pub workspace_root: PathBuf,
    pub indexer: Arc<dyn Indexer>,
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search the workspace for a pattern (regex; falls back to literal).\n\
         Returns up to 100 matches as path:line: text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Restrict the search to this subdirectory (default: whole workspace)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn safe(&self) -> bool {
        true
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.args.get("query").and_then(Value::as_str) {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => return ToolOutput::err(&call.id, "missing required parameter: query"),
        };
        let root = match call.args.get("path").and_then(Value::as_str) {
            Some(sub) => match resolve_in_workspace(&self.workspace_root, sub) {
                Ok(p) => p,
                Err(e) => return ToolOutput::err(&call.id, format!("{}: {e}", e.code())),
            },
            None => self.workspace_root.clone(),
        };

        debug!(%query, root = %root.display(), "search_code tool");

        // Blocking directory walk moved off the async executor.
        let indexer = Arc::clone(&self.indexer);
        let result = tokio::task::spawn_blocking(move || indexer.search(&root, &query)).await;

        let hits = match result {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => return ToolOutput::err(&call.id, format!("search error: {e}")),
            Err(e) => return ToolOutput::err(&call.id, format!("search task failed: {e}")),
        };

        if hits.is_empty() {
            return ToolOutput::ok(&call.id, "no matches");
        }
        let text = hits
            .iter()
            .map(|h| format!("{}:{}: {}", h.path.display(), h.line, h.text))
            .collect::<Vec<_>>()
            .join("\n");
        ToolOutput::ok(&call.id, text)
    }
}
