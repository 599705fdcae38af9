// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Unified SSE parsing: byte stream → normalized [`StreamEvent`]s → assembled
//! [`ChatEvent`]s.
//!
//! The scanner is provider-agnostic.  It handles TCP-chunk reassembly, the
//! `event:` / `data:` field framing, and the line budget; everything
//! provider-specific lives behind [`ProviderStreamHandler`].

use std::collections::HashMap;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::{ChatEvent, PartialCall, StreamEvent, ToolCall, Usage};

/// Maximum bytes a single SSE line may occupy before the stream is aborted.
/// Tool-call argument payloads routinely exceed default scanner limits, so
/// the budget is deliberately generous.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Parses provider-specific SSE payloads into normalized events.
///
/// One handler instance serves one response stream; handlers may keep state
/// (e.g. the current content-block type for Anthropic).
pub trait ProviderStreamHandler: Send {
    /// Parse one `(event-name, data)` pair.  May produce zero or more events.
    fn handle(&mut self, event: Option<&str>, data: &str) -> Vec<StreamEvent>;
}

/// Scanner state carried across TCP chunks.
struct ScanState<H> {
    buf: String,
    /// Value of the last `event:` field, pending until its data line.
    event_name: Option<String>,
    handler: H,
    overflowed: bool,
}

/// Convert a `reqwest` byte stream into normalized [`StreamEvent`]s.
///
/// SSE lines can be split across TCP chunks, so a remainder buffer is carried
/// forward; only complete `\n`-terminated lines are parsed.  A line exceeding
/// [`MAX_LINE_BYTES`] aborts the stream with a single `Error` event.
pub fn scan_sse<S, B, E, H>(
    bytes: S,
    handler: H,
) -> impl Stream<Item = anyhow::Result<StreamEvent>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
    H: ProviderStreamHandler + 'static,
{
    let state = ScanState { buf: String::new(), event_name: None, handler, overflowed: false };
    bytes
        .scan(state, |st, chunk| {
            if st.overflowed {
                return std::future::ready(None);
            }
            let events: Vec<anyhow::Result<StreamEvent>> = match chunk {
                Ok(b) => {
                    st.buf.push_str(&String::from_utf8_lossy(b.as_ref()));
                    if st.buf.find('\n').is_none() && st.buf.len() > MAX_LINE_BYTES {
                        st.overflowed = true;
                        vec![Ok(StreamEvent::Error {
                            message: format!("SSE line exceeds {MAX_LINE_BYTES} byte budget"),
                        })]
                    } else {
                        drain_complete_lines(st)
                    }
                }
                Err(e) => vec![Err(e.into())],
            };
            std::future::ready(Some(events))
        })
        .flat_map(futures::stream::iter)
}

/// Drain all complete `\n`-terminated lines from the buffer, feeding
/// `data:` payloads to the handler.  Any trailing incomplete line stays in
/// the buffer for the next chunk.
fn drain_complete_lines<H: ProviderStreamHandler>(
    st: &mut ScanState<H>,
) -> Vec<anyhow::Result<StreamEvent>> {
    let mut events = Vec::new();
    while let Some(nl) = st.buf.find('\n') {
        let line = st.buf[..nl].trim_end_matches('\r').to_string();
        st.buf.drain(..=nl);

        if line.is_empty() {
            // Blank line ends the current SSE event; the pending name is spent.
            st.event_name = None;
            continue;
        }
        if let Some(name) = line.strip_prefix("event:") {
            st.event_name = Some(name.trim().to_string());
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            for ev in st.handler.handle(st.event_name.as_deref(), data) {
                events.push(Ok(ev));
            }
        }
        // Comment lines (": keepalive") and unknown fields are ignored.
    }
    events
}

// ─── Tool-call assembly ──────────────────────────────────────────────────────

/// Per-tool required-argument validation applied before a call is emitted.
///
/// A call failing validation is dropped entirely; the orchestrator's retry
/// policy re-requests the turn non-streaming where complete metadata is
/// available in one payload.
pub fn required_args_ok(name: &str, args: &Value) -> Result<(), String> {
    let non_empty_str = |field: &str| -> Result<(), String> {
        match args.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err(format!("tool {name} requires non-empty {field:?}")),
        }
    };
    match name {
        "read_file" => non_empty_str("path"),
        "search_code" => non_empty_str("query"),
        "edit_file" | "apply_edit" => non_empty_str("path"),
        _ => Ok(()),
    }
}

impl PartialCall {
    /// Resolve the accumulator into a dispatchable [`ToolCall`], or `None`
    /// when the partial is incomplete or its arguments are invalid.
    ///
    /// An empty args buffer resolves to `{}` (providers require an object);
    /// an empty name aborts the emit — the call cannot be dispatched and
    /// recording it would corrupt the conversation replayed to the API.
    pub fn finish(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            warn!(tool_call_id = %self.id, "dropping tool call with empty name");
            return None;
        }
        let args: Value = if self.args_buf.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) | Err(_) => {
                    warn!(
                        tool_name = %self.name,
                        args_buf = %self.args_buf,
                        "tool call arguments are not a JSON object; dropping call"
                    );
                    return None;
                }
            }
        };
        if let Err(reason) = required_args_ok(&self.name, &args) {
            warn!(%reason, "dropping tool call failing argument validation");
            return None;
        }
        Some(ToolCall { id: self.id, name: self.name, args })
    }
}

struct AssembleState {
    partials: HashMap<u32, PartialCall>,
    flushed: bool,
    done: bool,
}

fn flush_partials(partials: &mut HashMap<u32, PartialCall>) -> Vec<anyhow::Result<ChatEvent>> {
    let mut pending: Vec<(u32, PartialCall)> = partials.drain().collect();
    pending.sort_by_key(|(idx, _)| *idx);
    pending
        .into_iter()
        .filter_map(|(_, p)| p.finish())
        .map(|tc| Ok(ChatEvent::Call(tc)))
        .collect()
}

/// Assemble normalized [`StreamEvent`]s into orchestrator-level
/// [`ChatEvent`]s: text and reasoning pass through, tool-call fragments are
/// accumulated by index and flushed on the provider's end-of-tool-use signal
/// (or, as a fallback, on stream end).
pub fn assemble<S>(events: S) -> impl Stream<Item = anyhow::Result<ChatEvent>> + Send
where
    S: Stream<Item = anyhow::Result<StreamEvent>> + Send + 'static,
{
    let state = AssembleState { partials: HashMap::new(), flushed: false, done: false };
    events
        .scan(state, |st, item| {
            if st.done {
                return std::future::ready(None);
            }
            let out: Vec<anyhow::Result<ChatEvent>> = match item {
                Err(e) => vec![Err(e)],
                Ok(StreamEvent::TextDelta { content }) => {
                    if content.is_empty() {
                        vec![]
                    } else {
                        vec![Ok(ChatEvent::Token(content))]
                    }
                }
                Ok(StreamEvent::ReasoningDelta { content, done }) => {
                    if content.is_empty() && !done {
                        vec![]
                    } else {
                        vec![Ok(ChatEvent::Reasoning { text: content, done })]
                    }
                }
                Ok(StreamEvent::ToolCallDelta { index, id, name, args_fragment }) => {
                    let p = st
                        .partials
                        .entry(index)
                        .or_insert_with(|| PartialCall { index, ..PartialCall::default() });
                    if let Some(id) = id {
                        if !id.is_empty() {
                            p.id = id;
                        }
                    }
                    if let Some(name) = name {
                        if !name.is_empty() {
                            p.name = name;
                        }
                    }
                    if let Some(frag) = args_fragment {
                        p.args_buf.push_str(&frag);
                    }
                    vec![]
                }
                Ok(StreamEvent::ToolCallEnd { .. }) => {
                    st.flushed = true;
                    flush_partials(&mut st.partials)
                }
                Ok(StreamEvent::Usage { input_tokens, output_tokens, total_tokens }) => {
                    vec![Ok(ChatEvent::Usage(Usage { input_tokens, output_tokens, total_tokens }))]
                }
                Ok(StreamEvent::Error { message }) => vec![Err(anyhow::anyhow!(message))],
                Ok(StreamEvent::End) => {
                    st.done = true;
                    let mut out = if st.flushed {
                        vec![]
                    } else {
                        flush_partials(&mut st.partials)
                    };
                    out.push(Ok(ChatEvent::Done));
                    out
                }
            };
            std::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
