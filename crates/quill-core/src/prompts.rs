// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use quill_memory::Rules;

/// Compose the system prompt for one workspace: the fixed operating
/// contract, the workspace root, and any user/project rules.
pub fn system_prompt(workspace: &Path, rules: &Rules) -> String {
    let mut out = String::from(
        "You are a coding assistant working inside the user's project.\n\
         Use the provided tools to read, search, and modify files, and to run\n\
         shell commands.  Every file edit and shell command needs user\n\
         approval before it takes effect; propose them through the tools and\n\
         wait for the result.  Keep edits minimal and focused.  When the task\n\
         is complete, call the finalize tool with a concise summary.\n",
    );
    out.push_str(&format!("\nWorkspace root: {}\n", workspace.display()));
    if !rules.user.trim().is_empty() {
        out.push_str("\nUser rules:\n");
        out.push_str(rules.user.trim());
        out.push('\n');
    }
    if !rules.project.trim().is_empty() {
        out.push_str("\nProject rules:\n");
        out.push_str(rules.project.trim());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_workspace() {
        let p = system_prompt(Path::new("/home/u/proj"), &Rules::default());
        assert!(p.contains("/home/u/proj"));
        assert!(p.contains("finalize"));
    }

    #[test]
    fn rules_are_included_when_present() {
        let rules = Rules { user: "prefer rg".into(), project: "no unwrap".into() };
        let p = system_prompt(Path::new("/w"), &rules);
        assert!(p.contains("User rules:\nprefer rg"));
        assert!(p.contains("Project rules:\nno unwrap"));
    }

    #[test]
    fn empty_rules_add_no_sections() {
        let p = system_prompt(Path::new("/w"), &Rules::default());
        assert!(!p.contains("User rules"));
        assert!(!p.contains("Project rules"));
    }
}
