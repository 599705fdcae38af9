// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Terminal tool: the model ends its turn with a concise summary.  The
/// orchestrator stops the loop when it sees this name.
pub struct FinalizeTool;

/// Name the orchestrator checks to end a turn.
pub const FINALIZE_TOOL: &str = "finalize";

#[async_trait]
impl Tool for FinalizeTool {
    fn name(&self) -> &str {
        FINALIZE_TOOL
    }

    fn description(&self) -> &str {
        "Finish the current task with a concise summary of what was done.\n\
         Call this when no further tool use is needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "One-paragraph summary of the work completed"
                }
            },
            "required": ["summary"],
            "additionalProperties": false
        })
    }

    fn safe(&self) -> bool {
        true
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let summary = call
            .args
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("Done.");
        ToolOutput::ok(&call.id, summary)
    }
}
