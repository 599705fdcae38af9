// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Code search behind a trait so the core does not depend on how search is
//! implemented.  The default walks the workspace with a regex; an embedded
//! search binary or a symbol index can be plugged in from outside.

use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

/// Maximum file size considered by the default indexer.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Maximum hits returned per query.
const MAX_HITS: usize = 100;

#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Path relative to the search root.
    pub path: PathBuf,
    /// 1-indexed line number.
    pub line: usize,
    pub text: String,
}

pub trait Indexer: Send + Sync {
    fn search(&self, root: &Path, query: &str) -> anyhow::Result<Vec<SearchHit>>;
}

/// Default indexer: recursive walk + line-by-line regex match.
///
/// The query is compiled as a regex; a query that fails to compile is
/// matched literally instead, so `fn main(` works without escaping.
pub struct RegexIndexer;

impl Indexer for RegexIndexer {
    fn search(&self, root: &Path, query: &str) -> anyhow::Result<Vec<SearchHit>> {
        let re = Regex::new(query).or_else(|_| Regex::new(&regex::escape(query)))?;
        let mut hits = Vec::new();

        'files: for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped(e))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                // Binary or non-UTF-8 file.
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    let rel = entry
                        .path()
                        .strip_prefix(root)
                        .unwrap_or(entry.path())
                        .to_path_buf();
                    hits.push(SearchHit {
                        path: rel,
                        line: i + 1,
                        text: line.trim_end().to_string(),
                    });
                    if hits.len() >= MAX_HITS {
                        break 'files;
                    }
                }
            }
        }
        Ok(hits)
    }
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && (name.starts_with('.') || name == "target" || name == "node_modules")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
