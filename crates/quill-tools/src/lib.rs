// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod indexer;
mod registry;
mod tool;

pub use builtin::edit::{ApplyEditTool, EditFileTool};
pub use builtin::finalize::{FinalizeTool, FINALIZE_TOOL};
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::search_code::SearchCodeTool;
pub use builtin::shell::{ApplyShellTool, RunShellTool};
pub use builtin::user_choice::UserChoiceTool;
pub use indexer::{Indexer, RegexIndexer, SearchHit};
pub use registry::ToolRegistry;
pub use tool::{path_hint, Tool, ToolCall, ToolOutput};

use std::path::Path;
use std::sync::Arc;

use quill_config::Settings;
use quill_edit::Planner;

/// Build the standard registry for one workspace.
///
/// Called on startup and again on every workspace switch; the returned
/// registry is immutable and installed atomically by the orchestrator.
pub fn builtin_registry(
    workspace_root: &Path,
    settings: &Settings,
    indexer: Arc<dyn Indexer>,
) -> anyhow::Result<ToolRegistry> {
    let planner = Arc::new(Planner::new(workspace_root)?);
    let root = planner.workspace_root().to_path_buf();
    let shell_timeout = settings.agent.shell_timeout_secs;

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool { workspace_root: root.clone() });
    registry.register(ListDirTool { workspace_root: root.clone() });
    registry.register(SearchCodeTool { workspace_root: root.clone(), indexer });
    registry.register(EditFileTool { planner: Arc::clone(&planner) });
    registry.register(ApplyEditTool { planner, safety: settings.edits.clone() });
    registry.register(RunShellTool {
        workspace_root: root.clone(),
        default_timeout_secs: shell_timeout,
    });
    registry.register(ApplyShellTool { workspace_root: root, default_timeout_secs: shell_timeout });
    registry.register(UserChoiceTool);
    registry.register(FinalizeTool);
    Ok(registry)
}
