// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

/// Typed failure of a planning operation.
///
/// Each variant maps to a stable code (see [`PlanError::code`]) that tool
/// results and UI messages carry, so callers can branch without parsing
/// human-readable text.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("path escapes the workspace root: {path}")]
    PathTraversal { path: PathBuf },
    #[error("file already exists: {path}")]
    FileExists { path: PathBuf },
    #[error("target is a directory: {path}")]
    IsDirectory { path: PathBuf },
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },
    #[error("invalid line range {start}..{end} (1-indexed, start <= end required)")]
    InvalidRange { start: i64, end: i64 },
    #[error("line range {start}..{end} exceeds file length ({line_count} lines)")]
    RangeOutOfBounds { start: usize, end: usize, line_count: usize },
    #[error("invalid line number {line} (1-indexed)")]
    InvalidLine { line: i64 },
    #[error("line {line} exceeds file length ({line_count} lines)")]
    LineOutOfBounds { line: usize, line_count: usize },
    #[error("old string must not be empty")]
    EmptyOldString,
    #[error("string not found in {path}")]
    StringNotFound { path: PathBuf },
    #[error("string occurs {count} times in {path}; use anchors for multi-site edits")]
    AmbiguousReplacement { path: PathBuf, count: usize },
    #[error("anchored replace needs a target or at least one anchor")]
    MissingAnchors,
    #[error("anchor_before not found (occurrence {occurrence})")]
    AnchorBeforeNotFound { occurrence: usize },
    #[error("anchor_after not found (occurrence {occurrence})")]
    AnchorAfterNotFound { occurrence: usize },
    #[error("anchors delimit an invalid window")]
    AnchorWindowInvalid,
    #[error("target not found between anchors")]
    TargetNotFound,
    #[error("normalized position {index} cannot be mapped back to the original text")]
    IndexMapError { index: usize },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlanError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::PathTraversal { .. } => "PATH_TRAVERSAL",
            PlanError::FileExists { .. } => "FILE_EXISTS",
            PlanError::IsDirectory { .. } => "IS_DIRECTORY",
            PlanError::FileNotFound { .. } => "FILE_NOT_FOUND",
            PlanError::InvalidRange { .. } => "INVALID_RANGE",
            PlanError::RangeOutOfBounds { .. } => "RANGE_OOB",
            PlanError::InvalidLine { .. } => "INVALID_LINE",
            PlanError::LineOutOfBounds { .. } => "LINE_OOB",
            PlanError::EmptyOldString => "EMPTY_OLD_STRING",
            PlanError::StringNotFound { .. } => "STRING_NOT_FOUND",
            PlanError::AmbiguousReplacement { .. } => "AMBIGUOUS_REPLACEMENT",
            PlanError::MissingAnchors => "MISSING_ANCHORS",
            PlanError::AnchorBeforeNotFound { .. } => "ANCHOR_BEFORE_NOT_FOUND",
            PlanError::AnchorAfterNotFound { .. } => "ANCHOR_AFTER_NOT_FOUND",
            PlanError::AnchorWindowInvalid => "ANCHOR_WINDOW_INVALID",
            PlanError::TargetNotFound => "TARGET_NOT_FOUND",
            PlanError::IndexMapError { .. } => "INDEX_MAP_ERROR",
            PlanError::Io { .. } => "IO_ERROR",
        }
    }
}

/// Failure while applying a validated plan to the filesystem.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("refusing to write {path}: extension {extension:?} is forbidden")]
    ForbiddenExtension { path: PathBuf, extension: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
