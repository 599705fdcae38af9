// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use similar::{ChangeTag, TextDiff};

/// First and last changed line (1-indexed, inclusive) in the new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// Render a unified diff between `old` and `new` with per-line numbering,
/// three context lines around each change, and a trailing
/// `N line(s) changed` summary.
///
/// Creations (`old` empty) render as a full new-file block, deletions
/// (`new` empty) as a full removal block — both fall out of the grouped-ops
/// walk without special cases.
pub fn render_unified(old: &str, new: &str) -> (String, Option<LineRange>) {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    let mut changed_lines = 0usize;
    let mut range: Option<LineRange> = None;

    for group in diff.grouped_ops(3) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_start = first.old_range().start + 1;
        let old_len = last.old_range().end - first.old_range().start;
        let new_start = first.new_range().start + 1;
        let new_len = last.new_range().end - first.new_range().start;
        out.push_str(&format!(
            "@@ -{old_start},{old_len} +{new_start},{new_len} @@\n"
        ));

        for op in &group {
            for change in diff.iter_changes(op) {
                let line = change.value().trim_end_matches('\n');
                match change.tag() {
                    ChangeTag::Equal => {
                        out.push_str(&format!(
                            "{:>5} {:>5}   {line}\n",
                            change.old_index().map(|i| i + 1).unwrap_or(0),
                            change.new_index().map(|i| i + 1).unwrap_or(0),
                        ));
                    }
                    ChangeTag::Delete => {
                        changed_lines += 1;
                        out.push_str(&format!(
                            "{:>5}       - {line}\n",
                            change.old_index().map(|i| i + 1).unwrap_or(0),
                        ));
                    }
                    ChangeTag::Insert => {
                        changed_lines += 1;
                        out.push_str(&format!(
                            "      {:>5} + {line}\n",
                            change.new_index().map(|i| i + 1).unwrap_or(0),
                        ));
                    }
                }
            }
        }
    }

    // Changed-line window in the NEW file, taken from the non-equal ops.
    for op in diff.ops() {
        if matches!(op, similar::DiffOp::Equal { .. }) {
            continue;
        }
        let r = op.new_range();
        let start = r.start + 1;
        let end = r.end.max(r.start + 1);
        range = Some(match range {
            None => LineRange { start, end },
            Some(cur) => LineRange { start: cur.start.min(start), end: cur.end.max(end) },
        });
    }

    if changed_lines == 0 {
        out.push_str("0 line(s) changed\n");
    } else {
        out.push_str(&format!("\n{changed_lines} line(s) changed\n"));
    }
    (out, range)
}
