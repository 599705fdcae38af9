// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Routes a model question through the approval broker: the question text
/// becomes the approval summary and the user's yes/no lands in the
/// `{approved, …}` tool result.  No effect phase exists.
pub struct UserChoiceTool;

#[async_trait]
impl Tool for UserChoiceTool {
    fn name(&self) -> &str {
        "user_choice"
    }

    fn description(&self) -> &str {
        "Ask the user to confirm or decline a proposal.  Phrase the question\n\
         so that approval means 'yes, proceed'.  Optional options list is\n\
         shown for context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The yes/no question to put to the user"
                },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional alternatives shown alongside the question"
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    fn safe(&self) -> bool {
        false
    }

    async fn plan(&self, call: &ToolCall) -> ToolOutput {
        let question = match call.args.get("question").and_then(Value::as_str) {
            Some(q) if !q.is_empty() => q,
            _ => return ToolOutput::err(&call.id, "missing required parameter: question"),
        };
        let mut text = question.to_string();
        if let Some(options) = call.args.get("options").and_then(Value::as_array) {
            for (i, opt) in options.iter().filter_map(Value::as_str).enumerate() {
                text.push_str(&format!("\n  {}. {opt}", i + 1));
            }
        }
        ToolOutput::ok(&call.id, text)
    }
}
