// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use quill_config::EditSafetySettings;
use tracing::{debug, warn};

use crate::error::ApplyError;
use crate::plan::EditPlan;

/// Result of applying a plan: the write happened, possibly with warnings
/// from the suspicious-pattern heuristics.
#[derive(Debug, Default)]
pub struct EditOutcome {
    pub warnings: Vec<String>,
}

/// Apply a validated plan to the filesystem.
///
/// The plan is consumed: application is a one-shot step downstream of
/// approval.  Writes go through a temp file in the target directory followed
/// by a rename, so a crash never leaves a half-written file.  Safety gate:
/// forbidden extensions reject the write outright; suspicious content
/// patterns are heuristics that warn, naming the trigger, without blocking.
pub fn apply(plan: EditPlan, safety: &EditSafetySettings) -> Result<EditOutcome, ApplyError> {
    let path = &plan.path;

    if let Some(ext) = forbidden_extension(path, safety) {
        return Err(ApplyError::ForbiddenExtension {
            path: path.clone(),
            extension: ext,
        });
    }

    let mut outcome = EditOutcome::default();
    for pattern in &safety.suspicious_patterns {
        if !pattern.is_empty() && plan.new_content.contains(pattern.as_str()) {
            let msg = format!(
                "content written to {} matches suspicious pattern {pattern:?}",
                path.display()
            );
            warn!("{msg}");
            outcome.warnings.push(msg);
        }
    }

    if plan.is_deletion {
        std::fs::remove_file(path)
            .map_err(|e| ApplyError::Io { path: path.clone(), source: e })?;
        debug!(path = %path.display(), "file deleted");
        return Ok(outcome);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ApplyError::Io { path: path.clone(), source: e })?;
        }
    }
    write_atomic(path, &plan.new_content)
        .map_err(|e| ApplyError::Io { path: path.clone(), source: e })?;
    debug!(path = %path.display(), bytes = plan.new_content.len(), "edit applied");
    Ok(outcome)
}

/// The matching forbidden extension for `path`, if any.  Suffix comparison
/// is case-insensitive so `KEY.PEM` does not slip through.
fn forbidden_extension(path: &Path, safety: &EditSafetySettings) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    safety
        .forbidden_extensions
        .iter()
        .find(|ext| !ext.is_empty() && name.ends_with(&ext.to_lowercase()))
        .cloned()
}

/// Write via temp file + rename in the same directory, mode 0644 on unix.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(d) => tempfile::NamedTempFile::new_in(d)?,
        None => tempfile::NamedTempFile::new()?,
    };
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Planner;

    fn safety() -> EditSafetySettings {
        serde_yaml::from_str("{}").unwrap()
    }

    fn workspace(files: &[(&str, &str)]) -> (tempfile::TempDir, Planner) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let planner = Planner::new(dir.path()).unwrap();
        (dir, planner)
    }

    #[test]
    fn apply_create_writes_file_and_parents() {
        let (_d, p) = workspace(&[]);
        let plan = p.create("deep/dir/new.rs", "fn main() {}\n").unwrap();
        let path = plan.path.clone();
        apply(plan, &safety()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "fn main() {}\n");
    }

    #[test]
    fn apply_replace_round_trips_plan_contents() {
        let (_d, p) = workspace(&[("f.txt", "a\nb\nc\n")]);
        let plan = p.replace_lines("f.txt", 2, 2, "B").unwrap();
        let (path, expected) = (plan.path.clone(), plan.new_content.clone());
        apply(plan, &safety()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), expected);
    }

    #[test]
    fn apply_deletion_removes_file() {
        let (_d, p) = workspace(&[("gone.txt", "x\n")]);
        let plan = p.delete_file("gone.txt").unwrap();
        let path = plan.path.clone();
        apply(plan, &safety()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn forbidden_extension_blocks_write() {
        let (_d, p) = workspace(&[]);
        let plan = p.create("secrets.pem", "-----BEGIN-----\n").unwrap();
        let path = plan.path.clone();
        let err = apply(plan, &safety()).unwrap_err();
        assert!(matches!(err, ApplyError::ForbiddenExtension { .. }), "{err}");
        assert!(!path.exists(), "blocked write must not create the file");
    }

    #[test]
    fn forbidden_extension_is_case_insensitive() {
        let (_d, p) = workspace(&[]);
        let plan = p.create("KEY.PEM", "x").unwrap();
        assert!(apply(plan, &safety()).is_err());
    }

    #[test]
    fn suspicious_pattern_warns_but_writes() {
        let (_d, p) = workspace(&[]);
        let plan = p.create("config.sh", "export token=abc123\n").unwrap();
        let path = plan.path.clone();
        let outcome = apply(plan, &safety()).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("token="), "{:?}", outcome.warnings);
        assert!(path.exists(), "warning must not block the write");
    }

    #[test]
    fn clean_content_has_no_warnings() {
        let (_d, p) = workspace(&[]);
        let plan = p.create("main.rs", "fn main() {}\n").unwrap();
        let outcome = apply(plan, &safety()).unwrap();
        assert!(outcome.warnings.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn written_file_has_mode_0644() {
        use std::os::unix::fs::PermissionsExt;
        let (_d, p) = workspace(&[]);
        let plan = p.create("plain.txt", "x\n").unwrap();
        let path = plan.path.clone();
        apply(plan, &safety()).unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn overwrite_is_atomic_replacement() {
        let (_d, p) = workspace(&[("f.txt", "old\n")]);
        let plan = p.replace_lines("f.txt", 1, 1, "new").unwrap();
        let path = plan.path.clone();
        apply(plan, &safety()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "new\n");
    }
}
