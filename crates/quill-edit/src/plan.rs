// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::diff::{render_unified, LineRange};
use crate::error::PlanError;
use crate::paths::resolve_in_workspace;

/// A validated, unapplied description of one file change.
///
/// Invariants: `path` is absolute and inside the workspace; `old_content`
/// equals the file bytes at plan time; applying the plan writes exactly
/// `new_content`, whose diff against `old_content` is `diff`.
#[derive(Debug, Clone)]
pub struct EditPlan {
    pub path: PathBuf,
    pub old_content: String,
    pub new_content: String,
    pub diff: String,
    pub is_creation: bool,
    pub is_deletion: bool,
    pub changed_range: Option<LineRange>,
}

/// Pure edit planner bound to one workspace root.
///
/// Planning never touches the filesystem beyond reading the target file;
/// application is a separate, approval-gated step (see [`crate::apply`]).
pub struct Planner {
    workspace_root: PathBuf,
}

impl Planner {
    /// `root` must exist; it is canonicalized so the confinement check is
    /// immune to symlinks in the root path itself.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self { workspace_root: root.as_ref().canonicalize()? })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub(crate) fn resolve(&self, raw: &str) -> Result<PathBuf, PlanError> {
        resolve_in_workspace(&self.workspace_root, raw)
    }

    fn read(&self, path: &Path) -> Result<String, PlanError> {
        if path.is_dir() {
            return Err(PlanError::IsDirectory { path: path.to_path_buf() });
        }
        match std::fs::read_to_string(path) {
            Ok(c) => Ok(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PlanError::FileNotFound { path: path.to_path_buf() })
            }
            Err(e) => Err(PlanError::Io { path: path.to_path_buf(), source: e }),
        }
    }

    fn finish(
        &self,
        path: PathBuf,
        old_content: String,
        new_content: String,
        is_creation: bool,
        is_deletion: bool,
    ) -> EditPlan {
        let (diff, changed_range) = render_unified(&old_content, &new_content);
        debug!(path = %path.display(), is_creation, is_deletion, "edit planned");
        EditPlan { path, old_content, new_content, diff, is_creation, is_deletion, changed_range }
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Plan creation of a new file.
    pub fn create(&self, path: &str, content: &str) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        if path.is_dir() {
            return Err(PlanError::IsDirectory { path });
        }
        if path.exists() {
            return Err(PlanError::FileExists { path });
        }
        Ok(self.finish(path, String::new(), content.to_string(), true, false))
    }

    /// Plan deletion of an existing file.
    pub fn delete_file(&self, path: &str) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        let old = self.read(&path)?;
        Ok(self.finish(path, old, String::new(), false, true))
    }

    /// Replace lines `start..=end` (1-indexed, inclusive) with `content`.
    pub fn replace_lines(
        &self,
        path: &str,
        start: i64,
        end: i64,
        content: &str,
    ) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        let old = self.read(&path)?;
        let lines = split_lines(&old);
        let (start, end) = check_range(start, end, lines.len())?;

        let mut new_lines: Vec<&str> = lines[..start - 1].to_vec();
        new_lines.extend(split_lines(content));
        new_lines.extend_from_slice(&lines[end..]);
        let new = if new_lines.is_empty() { String::new() } else { join_like(&old, &new_lines) };
        Ok(self.finish(path, old, new, false, false))
    }

    /// Delete lines `start..=end` (1-indexed, inclusive).
    pub fn delete_lines(&self, path: &str, start: i64, end: i64) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        let old = self.read(&path)?;
        let lines = split_lines(&old);
        let (start, end) = check_range(start, end, lines.len())?;

        let mut new_lines: Vec<&str> = lines[..start - 1].to_vec();
        new_lines.extend_from_slice(&lines[end..]);
        // Deleting every line leaves an empty file, not a deleted one.
        let new = if new_lines.is_empty() { String::new() } else { join_like(&old, &new_lines) };
        Ok(self.finish(path, old, new, false, false))
    }

    /// Insert `content` before line `line` (1-indexed).
    pub fn insert_before(&self, path: &str, line: i64, content: &str) -> Result<EditPlan, PlanError> {
        self.insert(path, line, content, true)
    }

    /// Insert `content` after line `line` (1-indexed).
    pub fn insert_after(&self, path: &str, line: i64, content: &str) -> Result<EditPlan, PlanError> {
        self.insert(path, line, content, false)
    }

    fn insert(
        &self,
        path: &str,
        line: i64,
        content: &str,
        before: bool,
    ) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        let old = self.read(&path)?;
        let lines = split_lines(&old);

        if line <= 0 {
            return Err(PlanError::InvalidLine { line });
        }
        let line = line as usize;
        if line > lines.len() {
            return Err(PlanError::LineOutOfBounds { line, line_count: lines.len() });
        }

        let at = if before { line - 1 } else { line };
        let mut new_lines: Vec<&str> = lines[..at].to_vec();
        new_lines.extend(split_lines(content));
        new_lines.extend_from_slice(&lines[at..]);
        let new = join_like(&old, &new_lines);
        Ok(self.finish(path, old, new, false, false))
    }

    /// Replace the single occurrence of `old_str` with `new_str`.
    ///
    /// More than one occurrence is an error — anchored replace exists for
    /// intentional multi-site edits.
    pub fn search_replace(
        &self,
        path: &str,
        old_str: &str,
        new_str: &str,
    ) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        if old_str.is_empty() {
            return Err(PlanError::EmptyOldString);
        }
        let old = self.read(&path)?;
        let count = old.matches(old_str).count();
        match count {
            0 => Err(PlanError::StringNotFound { path }),
            1 => {
                let new = old.replacen(old_str, new_str, 1);
                Ok(self.finish(path, old, new, false, false))
            }
            _ => Err(PlanError::AmbiguousReplacement { path, count }),
        }
    }

    /// Anchored replace; see [`crate::anchor::AnchorSpec`] for the algorithm.
    pub fn anchor_replace(
        &self,
        path: &str,
        spec: &crate::anchor::AnchorSpec,
    ) -> Result<EditPlan, PlanError> {
        let path = self.resolve(path)?;
        let old = self.read(&path)?;
        let new = crate::anchor::apply_anchor_replace(&old, spec)?;
        Ok(self.finish(path, old, new, false, false))
    }
}

// ─── Line helpers ────────────────────────────────────────────────────────────

fn split_lines(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }
    s.lines().collect()
}

/// Join `lines`, terminating with a newline exactly when `original` was
/// newline-terminated (or when joining into a previously empty file).
fn join_like(original: &str, lines: &[&str]) -> String {
    let mut out = lines.join("\n");
    if original.is_empty() || original.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn check_range(start: i64, end: i64, line_count: usize) -> Result<(usize, usize), PlanError> {
    if start <= 0 || end < start {
        return Err(PlanError::InvalidRange { start, end });
    }
    let (start, end) = (start as usize, end as usize);
    if end > line_count {
        return Err(PlanError::RangeOutOfBounds { start, end, line_count });
    }
    Ok((start, end))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
