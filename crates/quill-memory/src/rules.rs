// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! User and project rule files: free-form markdown the orchestrator folds
//! into the system prompt.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Rule text pair exchanged with the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules {
    /// Applies to every project of this user.
    pub user: String,
    /// Applies to the current project only.
    pub project: String,
}

pub struct RulesStore {
    user_path: PathBuf,
    project_path: PathBuf,
}

impl RulesStore {
    /// `store_root` holds the user-global file, `project_dir` the
    /// per-project one.
    pub fn new(store_root: &Path, project_dir: &Path) -> Self {
        Self {
            user_path: store_root.join("rules.md"),
            project_path: project_dir.join("rules.md"),
        }
    }

    pub fn load(&self) -> Rules {
        Rules {
            user: std::fs::read_to_string(&self.user_path).unwrap_or_default(),
            project: std::fs::read_to_string(&self.project_path).unwrap_or_default(),
        }
    }

    pub fn save(&self, rules: &Rules) -> anyhow::Result<()> {
        for (path, text) in [(&self.user_path, &rules.user), (&self.project_path, &rules.project)] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = RulesStore::new(dir.path(), &dir.path().join("proj"));
        assert_eq!(s.load(), Rules::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let s = RulesStore::new(dir.path(), &dir.path().join("proj"));
        let rules = Rules {
            user: "always run tests".into(),
            project: "use four-space indent".into(),
        };
        s.save(&rules).unwrap();
        assert_eq!(s.load(), rules);
    }
}
