// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anchored replacement: locate a region by text fragments instead of line
//! numbers, optionally under whitespace normalization and fuzzy matching.

use serde::Deserialize;

use crate::error::PlanError;

fn default_occurrence() -> usize {
    1
}

/// Parameters of one anchored replace.
///
/// At least one of `target` / `anchor_before` / `anchor_after` must be set.
/// Deserializes directly from the tool-call argument object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnchorSpec {
    /// Fragment locating the start of the edit region.
    pub anchor_before: Option<String>,
    /// Fragment replaced inside the window.  When absent the whole window
    /// (including the `anchor_before` match) is replaced, so `content`
    /// conventionally restates the anchor text.
    pub target: Option<String>,
    /// Fragment bounding the end of the window (preserved in output).
    pub anchor_after: Option<String>,
    /// Replacement text.
    #[serde(default)]
    pub content: String,
    /// Collapse runs of spaces/tabs and drop CR before matching.
    #[serde(default)]
    pub normalize_whitespace: bool,
    /// Strict-scale threshold for fuzzy target matching: 1.0 = exact only.
    /// `None` disables fuzzy fallback.
    pub fuzzy_threshold: Option<f64>,
    /// Which occurrence of `anchor_before` delimits the window (1-based).
    #[serde(default = "default_occurrence")]
    pub occurrence: usize,
}

/// Normalized text plus the byte-index map back into the original.
struct NormalizedView {
    text: String,
    /// `map[i]` = original byte index of normalized byte `i`.
    map: Vec<usize>,
}

impl NormalizedView {
    fn build(original: &str, normalize: bool) -> Self {
        if !normalize {
            return Self {
                text: original.to_string(),
                map: (0..original.len()).collect(),
            };
        }
        let mut text = String::with_capacity(original.len());
        let mut map = Vec::with_capacity(original.len());
        let mut in_blank_run = false;
        for (idx, ch) in original.char_indices() {
            match ch {
                '\r' => continue,
                ' ' | '\t' => {
                    if !in_blank_run {
                        in_blank_run = true;
                        text.push(' ');
                        map.push(idx);
                    }
                }
                other => {
                    in_blank_run = false;
                    text.push(other);
                    for k in 0..other.len_utf8() {
                        map.push(idx + k);
                    }
                }
            }
        }
        Self { text, map }
    }

    /// Map a normalized start boundary to an original byte index.
    fn to_original(&self, index: usize, original_len: usize) -> Result<usize, PlanError> {
        if index == self.map.len() {
            return Ok(original_len);
        }
        self.map
            .get(index)
            .copied()
            .ok_or(PlanError::IndexMapError { index })
    }
}

/// Normalize a needle the same way the haystack view was built, so matches
/// line up position-for-position.
fn normalize_needle(needle: &str, normalize: bool) -> String {
    if !normalize {
        return needle.to_string();
    }
    NormalizedView::build(needle, true).text
}

/// Byte index of the `n`-th (1-based) occurrence of `needle` at/after `from`.
fn find_occurrence(haystack: &str, needle: &str, from: usize, n: usize) -> Option<usize> {
    let mut pos = from;
    let mut remaining = n.max(1);
    loop {
        let found = haystack[pos..].find(needle)? + pos;
        remaining -= 1;
        if remaining == 0 {
            return Some(found);
        }
        pos = found + needle.len().max(1);
    }
}

/// Execute an anchored replace against `original`, returning the new content.
pub fn apply_anchor_replace(original: &str, spec: &AnchorSpec) -> Result<String, PlanError> {
    if spec.target.is_none() && spec.anchor_before.is_none() && spec.anchor_after.is_none() {
        return Err(PlanError::MissingAnchors);
    }

    let view = NormalizedView::build(original, spec.normalize_whitespace);
    let text = view.text.as_str();

    // ── Window bounds in normalized space ────────────────────────────────────
    let (window_start, before_end) = match &spec.anchor_before {
        Some(anchor) => {
            let needle = normalize_needle(anchor, spec.normalize_whitespace);
            let pos = find_occurrence(text, &needle, 0, spec.occurrence)
                .ok_or(PlanError::AnchorBeforeNotFound { occurrence: spec.occurrence })?;
            (pos, pos + needle.len())
        }
        None => (0, 0),
    };

    let window_end = match &spec.anchor_after {
        Some(anchor) => {
            let needle = normalize_needle(anchor, spec.normalize_whitespace);
            find_occurrence(text, &needle, before_end, 1)
                .ok_or(PlanError::AnchorAfterNotFound { occurrence: 1 })?
        }
        None => text.len(),
    };

    // Target search begins after the anchor_before match; when the anchor
    // ends at end-of-line, step past the newline so the anchor line itself
    // stays out of the searched region.
    let mut search_start = before_end;
    if text[search_start..].starts_with('\n') {
        search_start += 1;
    }
    if window_end < search_start && spec.target.is_some() {
        return Err(PlanError::AnchorWindowInvalid);
    }
    if window_end < window_start {
        return Err(PlanError::AnchorWindowInvalid);
    }

    // ── Region to replace, in normalized space ───────────────────────────────
    let (region_start, region_end) = match &spec.target {
        Some(target) => {
            let needle = normalize_needle(target, spec.normalize_whitespace);
            let window = &text[search_start..window_end];
            match window.find(&needle) {
                Some(rel) => (search_start + rel, search_start + rel + needle.len()),
                None => match spec.fuzzy_threshold {
                    Some(strict) => {
                        // Strict scale inverts into matcher scale: a caller
                        // asking for 1.0 tolerates zero error.
                        let matcher_threshold = (1.0 - strict).clamp(0.0, 1.0);
                        let rel = fuzzy_find(window, &needle, matcher_threshold)
                            .ok_or(PlanError::TargetNotFound)?;
                        (search_start + rel, (search_start + rel + needle.len()).min(window_end))
                    }
                    None => return Err(PlanError::TargetNotFound),
                },
            }
        }
        // No target: the whole window is replaced, anchor_before included.
        None => (window_start, window_end),
    };

    // ── Map back and splice atomically ───────────────────────────────────────
    let orig_start = view.to_original(region_start, original.len())?;
    let orig_end = view.to_original(region_end, original.len())?;
    if orig_end < orig_start {
        return Err(PlanError::IndexMapError { index: region_end });
    }

    let mut out = String::with_capacity(original.len() + spec.content.len());
    out.push_str(&original[..orig_start]);
    out.push_str(&spec.content);
    out.push_str(&original[orig_end..]);
    Ok(out)
}

// ─── Fuzzy matching ──────────────────────────────────────────────────────────

/// Locate `pattern` in `text` tolerating errors up to `threshold`
/// (0.0 = exact, 1.0 = anything).  Returns the byte index of the best match.
///
/// Patterns up to 64 bytes use a Bitap scan in the diff-match-patch style;
/// longer patterns fall back to a sliding-window similarity scan.
fn fuzzy_find(text: &str, pattern: &str, threshold: f64) -> Option<usize> {
    if pattern.is_empty() || text.is_empty() {
        return None;
    }
    if pattern.len() <= 64 {
        match_bitap(text.as_bytes(), pattern.as_bytes(), threshold)
    } else {
        match_sliding(text, pattern, threshold)
    }
}

/// How much a match may drift from the expected location before the
/// proximity penalty consumes the whole error budget.
const MATCH_DISTANCE: f64 = 1000.0;

fn bitap_score(errors: usize, pos: usize, pattern_len: usize) -> f64 {
    let accuracy = errors as f64 / pattern_len as f64;
    let proximity = pos as f64 / MATCH_DISTANCE;
    accuracy + proximity
}

/// Bitap search with up to `m - 1` errors, scored like diff-match-patch's
/// `match_bitap` with the expected location fixed at the window start.
fn match_bitap(text: &[u8], pattern: &[u8], threshold: f64) -> Option<usize> {
    let m = pattern.len();
    debug_assert!(m <= 64);

    // Per-byte mask: bit (m-1-i) set when pattern[i] == byte.
    let mut alphabet = [0u64; 256];
    for (i, &b) in pattern.iter().enumerate() {
        alphabet[b as usize] |= 1u64 << (m - 1 - i);
    }
    let match_mask = 1u64 << (m - 1);

    let mut best_score = threshold;
    let mut best_loc: Option<usize> = None;

    let mut last_rd: Vec<u64> = Vec::new();
    for d in 0..m {
        // Highest error count still worth scanning for.
        if bitap_score(d, 0, m) > best_score {
            break;
        }
        let mut rd = vec![0u64; text.len() + 2];
        rd[text.len() + 1] = (1 << d) - 1;
        for j in (1..=text.len()).rev() {
            let char_match = alphabet[text[j - 1] as usize];
            if d == 0 {
                rd[j] = ((rd[j + 1] << 1) | 1) & char_match;
            } else {
                rd[j] = (((rd[j + 1] << 1) | 1) & char_match)
                    | (((last_rd[j + 1] | last_rd[j]) << 1) | 1)
                    | last_rd[j + 1];
            }
            if rd[j] & match_mask != 0 {
                // The scan runs right-to-left, so a set match bit at j means
                // the pattern matches forward from text position j - 1.
                let start = j - 1;
                let score = bitap_score(d, start, m);
                if score <= best_score {
                    best_score = score;
                    best_loc = Some(start);
                }
            }
        }
        last_rd = rd;
    }
    best_loc
}

/// Sliding-window similarity scan for patterns too long for Bitap masks.
fn match_sliding(text: &str, pattern: &str, threshold: f64) -> Option<usize> {
    let m = pattern.len();
    if text.len() < m {
        return None;
    }
    let mut best: Option<(f64, usize)> = None;
    let mut start = 0;
    while start + m <= text.len() {
        // Stay on char boundaries.
        if !text.is_char_boundary(start) {
            start += 1;
            continue;
        }
        let mut end = start + m;
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        let window = &text[start..end];
        let similarity = similar::TextDiff::from_chars(pattern, window).ratio() as f64;
        let error = 1.0 - similarity;
        if error <= threshold && best.map(|(b, _)| error < b).unwrap_or(true) {
            best = Some((error, start));
        }
        start += 1;
    }
    best.map(|(_, pos)| pos)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AnchorSpec {
        AnchorSpec { occurrence: 1, ..AnchorSpec::default() }
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn no_anchors_and_no_target_is_rejected() {
        let err = apply_anchor_replace("text", &spec()).unwrap_err();
        assert_eq!(err.code(), "MISSING_ANCHORS");
    }

    #[test]
    fn absent_anchor_before_is_reported() {
        let s = AnchorSpec { anchor_before: Some("nope".into()), ..spec() };
        let err = apply_anchor_replace("text", &s).unwrap_err();
        assert_eq!(err.code(), "ANCHOR_BEFORE_NOT_FOUND");
    }

    #[test]
    fn absent_anchor_after_is_reported() {
        let s = AnchorSpec {
            anchor_before: Some("text".into()),
            anchor_after: Some("nope".into()),
            ..spec()
        };
        let err = apply_anchor_replace("text more", &s).unwrap_err();
        assert_eq!(err.code(), "ANCHOR_AFTER_NOT_FOUND");
    }

    #[test]
    fn missing_target_is_reported() {
        let s = AnchorSpec {
            anchor_before: Some("start".into()),
            target: Some("absent".into()),
            ..spec()
        };
        let err = apply_anchor_replace("start middle end", &s).unwrap_err();
        assert_eq!(err.code(), "TARGET_NOT_FOUND");
    }

    // ── Window replacement (no target) ────────────────────────────────────────

    /// The anchored-insert regression: appending a field to a JSON object
    /// must not duplicate the anchor line.
    #[test]
    fn json_field_append_does_not_duplicate_anchor() {
        let original = "{\n    \"test\": \"in fact\",\n    \"true?\": false,\n    \"number\": 123\n}";
        let s = AnchorSpec {
            anchor_before: Some("    \"number\": 123".into()),
            anchor_after: Some("}".into()),
            content: "    \"number\": 123,\n    \"story\": \"once upon a time\"\n".into(),
            ..spec()
        };
        let out = apply_anchor_replace(original, &s).unwrap();
        assert_eq!(out.matches("\"number\": 123").count(), 1, "{out}");
        assert!(out.contains("\"story\""), "{out}");
        assert!(out.contains("\"test\": \"in fact\""), "untouched prefix lost: {out}");
    }

    #[test]
    fn window_between_anchors_is_replaced() {
        let s = AnchorSpec {
            anchor_before: Some("fn alpha".into()),
            anchor_after: Some("fn omega".into()),
            content: "fn alpha() { new(); }\n".into(),
            ..spec()
        };
        let out = apply_anchor_replace("fn alpha() { old(); }\nfn omega() {}\n", &s).unwrap();
        assert_eq!(out, "fn alpha() { new(); }\nfn omega() {}\n");
    }

    #[test]
    fn no_anchor_after_extends_window_to_end() {
        let s = AnchorSpec {
            anchor_before: Some("marker".into()),
            content: "marker replaced".into(),
            ..spec()
        };
        let out = apply_anchor_replace("keep\nmarker old tail", &s).unwrap();
        assert_eq!(out, "keep\nmarker replaced");
    }

    #[test]
    fn occurrence_selects_the_nth_anchor() {
        let original = "item\nitem\nitem\n";
        let s = AnchorSpec {
            anchor_before: Some("item".into()),
            anchor_after: Some("\n".into()),
            content: "ITEM".into(),
            occurrence: 2,
            ..spec()
        };
        let out = apply_anchor_replace(original, &s).unwrap();
        assert_eq!(out, "item\nITEM\nitem\n");
    }

    // ── Target replacement ────────────────────────────────────────────────────

    #[test]
    fn target_inside_window_is_replaced_and_anchors_kept() {
        let s = AnchorSpec {
            anchor_before: Some("fn config() {".into()),
            anchor_after: Some("}".into()),
            target: Some("old_value".into()),
            content: "new_value".into(),
            ..spec()
        };
        let out = apply_anchor_replace("fn config() {\n    old_value\n}\n", &s).unwrap();
        assert_eq!(out, "fn config() {\n    new_value\n}\n");
    }

    #[test]
    fn anchor_line_is_preserved_when_target_given() {
        // anchor_before ends at end-of-line; the search starts on the next
        // line so a target equal to part of the anchor line is not matched.
        let s = AnchorSpec {
            anchor_before: Some("value = 1".into()),
            target: Some("value = 1".into()),
            content: "value = 2".into(),
            ..spec()
        };
        let out = apply_anchor_replace("value = 1\nvalue = 1\nrest\n", &s).unwrap();
        assert_eq!(out, "value = 1\nvalue = 2\nrest\n");
    }

    #[test]
    fn target_without_anchors_searches_whole_file() {
        let s = AnchorSpec {
            target: Some("needle".into()),
            content: "replaced".into(),
            ..spec()
        };
        let out = apply_anchor_replace("a needle b", &s).unwrap();
        assert_eq!(out, "a replaced b");
    }

    // ── Whitespace normalization ──────────────────────────────────────────────

    #[test]
    fn normalized_match_tolerates_run_length_differences() {
        let s = AnchorSpec {
            target: Some("let  x =   1;".into()),
            content: "let x = 2;".into(),
            normalize_whitespace: true,
            ..spec()
        };
        let out = apply_anchor_replace("fn f() {\n    let x = 1;\n}\n", &s).unwrap();
        assert!(out.contains("let x = 2;"), "{out}");
        assert!(!out.contains("let x = 1;"), "{out}");
    }

    #[test]
    fn normalization_drops_carriage_returns() {
        let s = AnchorSpec {
            target: Some("line two".into()),
            content: "LINE TWO".into(),
            normalize_whitespace: true,
            ..spec()
        };
        let out = apply_anchor_replace("line one\r\nline two\r\nline three\r\n", &s).unwrap();
        assert!(out.contains("LINE TWO"), "{out}");
        assert!(out.contains("line one\r\n"), "untouched CRLF must survive: {out}");
    }

    #[test]
    fn replacement_region_maps_back_to_original_indices() {
        // The tab-indented original must be spliced at its real byte
        // positions, not at normalized ones.
        let original = "\tkeep\n\t\told stuff\n\tkeep2\n";
        let s = AnchorSpec {
            target: Some("old stuff".into()),
            content: "new stuff".into(),
            normalize_whitespace: true,
            ..spec()
        };
        let out = apply_anchor_replace(original, &s).unwrap();
        assert_eq!(out, "\tkeep\n\t\tnew stuff\n\tkeep2\n");
    }

    // ── Fuzzy fallback ────────────────────────────────────────────────────────

    #[test]
    fn fuzzy_finds_target_with_small_typo() {
        let s = AnchorSpec {
            target: Some("let total = compute_sum(items);".into()),
            content: "let total = fold(items);".into(),
            fuzzy_threshold: Some(0.8),
            ..spec()
        };
        // File has "sums" instead of "sum".
        let out = apply_anchor_replace("let total = compute_sums(items);\n", &s).unwrap();
        assert!(out.contains("fold(items)"), "{out}");
    }

    #[test]
    fn strict_threshold_one_rejects_inexact_match() {
        let s = AnchorSpec {
            target: Some("alpha beta".into()),
            content: "x".into(),
            fuzzy_threshold: Some(1.0),
            ..spec()
        };
        let err = apply_anchor_replace("alpha betA", &s).unwrap_err();
        assert_eq!(err.code(), "TARGET_NOT_FOUND");
    }

    #[test]
    fn fuzzy_disabled_means_exact_only() {
        let s = AnchorSpec {
            target: Some("exact text".into()),
            content: "x".into(),
            ..spec()
        };
        let err = apply_anchor_replace("exakt text", &s).unwrap_err();
        assert_eq!(err.code(), "TARGET_NOT_FOUND");
    }

    #[test]
    fn long_pattern_uses_sliding_scan() {
        let pattern = "a".repeat(80) + "_tail_marker";
        let mut text = String::from("prefix ");
        text.push_str(&"a".repeat(79));
        text.push_str("b_tail_marker suffix");
        let s = AnchorSpec {
            target: Some(pattern),
            content: "SHORT".into(),
            fuzzy_threshold: Some(0.8),
            ..spec()
        };
        let out = apply_anchor_replace(&text, &s).unwrap();
        assert!(out.contains("SHORT"), "{out}");
    }

    // ── Bitap internals ───────────────────────────────────────────────────────

    #[test]
    fn bitap_exact_match_scores_best() {
        let loc = match_bitap(b"the quick brown fox", b"quick", 0.5).unwrap();
        assert_eq!(loc, 4);
    }

    #[test]
    fn bitap_tolerates_single_substitution() {
        let loc = match_bitap(b"the qwick brown fox", b"quick", 0.5).unwrap();
        assert_eq!(loc, 4);
    }

    #[test]
    fn bitap_zero_threshold_requires_exact() {
        assert!(match_bitap(b"the qwick fox", b"quick", 0.0).is_none());
        assert_eq!(match_bitap(b"the quick fox", b"quick", 0.0), Some(4));
    }

    // ── AnchorSpec deserialization ────────────────────────────────────────────

    #[test]
    fn spec_deserializes_from_tool_args() {
        let s: AnchorSpec = serde_json::from_value(serde_json::json!({
            "anchor_before": "fn main",
            "content": "fn main() {}",
            "normalize_whitespace": true,
            "fuzzy_threshold": 0.9
        }))
        .unwrap();
        assert_eq!(s.occurrence, 1, "occurrence defaults to 1");
        assert!(s.normalize_whitespace);
        assert_eq!(s.fuzzy_threshold, Some(0.9));
    }
}
