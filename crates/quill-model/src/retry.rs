// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Empty-response retry policy.
//!
//! A model turn occasionally yields nothing: whitespace-only deltas, a tool
//! call whose streamed metadata never completed, or a transport hiccup.  The
//! wrapper makes exactly one additional attempt with the opposite streaming
//! mode — non-streaming responses carry complete tool-call metadata in one
//! payload, which is precisely what a broken streamed attempt was missing.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::provider::EventStream;
use crate::{ChatEvent, ChatRequest, ModelProvider};

/// Notice token emitted between the failed first attempt and the retry.
pub const RETRY_NOTICE: &str = "Retrying due to empty response…";

/// Outcome of driving one attempt to completion.
enum Attempt {
    /// At least one non-whitespace token or completed tool call was seen.
    Produced,
    /// Stream finished without content.
    Empty,
    /// The receiver went away; stop immediately.
    Cancelled,
}

/// `chat` with the empty-response retry law applied: if the first attempt
/// produces neither a text token nor a tool call, emit [`RETRY_NOTICE`] and
/// retry exactly once with `stream` flipped.
pub fn chat_with_retry(provider: Arc<dyn ModelProvider>, req: ChatRequest) -> EventStream {
    let (tx, rx) = mpsc::channel::<anyhow::Result<ChatEvent>>(64);

    tokio::spawn(async move {
        let outcome = match provider.chat(req.clone()).await {
            Ok(stream) => drive(stream, &tx, false).await,
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "first attempt failed");
                Attempt::Empty
            }
        };

        match outcome {
            Attempt::Cancelled => return,
            Attempt::Produced => {
                let _ = tx.send(Ok(ChatEvent::Done)).await;
                return;
            }
            Attempt::Empty => {}
        }

        if tx.send(Ok(ChatEvent::Token(RETRY_NOTICE.into()))).await.is_err() {
            return;
        }

        let retry_req = ChatRequest { stream: !req.stream, ..req };
        match provider.chat(retry_req).await {
            Ok(stream) => {
                if matches!(drive(stream, &tx, true).await, Attempt::Cancelled) {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
            }
        }
        let _ = tx.send(Ok(ChatEvent::Done)).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Forward one attempt's events into `tx`, holding back the terminal `Done`
/// (the wrapper owns end-of-turn) and reporting whether content appeared.
///
/// Stream errors on a contentless attempt are absorbed when
/// `surface_errors` is false — the retry covers them; once real content has
/// flowed, or on the final attempt, errors pass through.
async fn drive(
    mut stream: EventStream,
    tx: &mpsc::Sender<anyhow::Result<ChatEvent>>,
    surface_errors: bool,
) -> Attempt {
    let mut produced = false;
    while let Some(item) = stream.next().await {
        match &item {
            Ok(ChatEvent::Token(t)) if !t.trim().is_empty() => produced = true,
            Ok(ChatEvent::Call(_)) => produced = true,
            Ok(ChatEvent::Done) => break,
            Err(e) if !surface_errors && !produced => {
                warn!(error = %e, "attempt failed mid-stream; deferring to retry");
                return Attempt::Empty;
            }
            _ => {}
        }
        if tx.send(item).await.is_err() {
            return Attempt::Cancelled;
        }
    }
    if produced {
        Attempt::Produced
    } else {
        Attempt::Empty
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;
    use crate::{Message, ToolCall};

    async fn collect(stream: EventStream) -> Vec<ChatEvent> {
        stream.map(|r| r.unwrap()).collect().await
    }

    fn request(stream: bool) -> ChatRequest {
        ChatRequest { messages: vec![Message::user("hi")], tools: vec![], stream }
    }

    #[tokio::test]
    async fn productive_first_attempt_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ChatEvent::Token("Hello".into()), ChatEvent::Done],
        ]));
        let events = collect(chat_with_retry(provider.clone(), request(true))).await;
        assert_eq!(events, vec![ChatEvent::Token("Hello".into()), ChatEvent::Done]);
        assert_eq!(provider.requests().len(), 1, "no second attempt");
    }

    /// Retry law: whitespace-only first attempt triggers exactly one retry
    /// with the opposite streaming mode, and the final text appears once.
    #[tokio::test]
    async fn empty_streaming_attempt_retries_non_streaming() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ChatEvent::Token("  \n".into()), ChatEvent::Done],
            vec![ChatEvent::Token("Hello".into()), ChatEvent::Done],
        ]));
        let events = collect(chat_with_retry(provider.clone(), request(true))).await;

        assert_eq!(
            events,
            vec![
                ChatEvent::Token("  \n".into()),
                ChatEvent::Token(RETRY_NOTICE.into()),
                ChatEvent::Token("Hello".into()),
                ChatEvent::Done,
            ]
        );
        let reqs = provider.requests();
        assert_eq!(reqs.len(), 2);
        assert!(reqs[0].stream, "first attempt streams");
        assert!(!reqs[1].stream, "retry flips the streaming mode");
    }

    #[tokio::test]
    async fn tool_call_counts_as_content() {
        let call = ToolCall { id: "c".into(), name: "finalize".into(), args: serde_json::json!({}) };
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ChatEvent::Call(call.clone()), ChatEvent::Done],
        ]));
        let events = collect(chat_with_retry(provider.clone(), request(true))).await;
        assert_eq!(events, vec![ChatEvent::Call(call), ChatEvent::Done]);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_retry_gives_up_after_second_attempt() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ChatEvent::Done],
            vec![ChatEvent::Done],
        ]));
        let events = collect(chat_with_retry(provider.clone(), request(false))).await;
        // Exactly one notice, then Done — never a third attempt.
        assert_eq!(events, vec![ChatEvent::Token(RETRY_NOTICE.into()), ChatEvent::Done]);
        let reqs = provider.requests();
        assert_eq!(reqs.len(), 2);
        assert!(!reqs[0].stream);
        assert!(reqs[1].stream, "opposite mode even when first attempt was non-streaming");
    }

    /// A stream that dies before producing anything is covered by the retry
    /// rather than surfaced — the caller only ever sees the recovered turn.
    #[tokio::test]
    async fn mid_stream_error_before_content_defers_to_retry() {
        struct FlakyProvider {
            calls: std::sync::Mutex<u32>,
        }

        #[async_trait::async_trait]
        impl ModelProvider for FlakyProvider {
            fn name(&self) -> &str {
                "flaky"
            }
            fn model_name(&self) -> &str {
                "m"
            }
            async fn chat(&self, _req: ChatRequest) -> anyhow::Result<EventStream> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    Ok(Box::pin(futures::stream::iter(vec![Err(anyhow::anyhow!(
                        "connection reset"
                    ))])))
                } else {
                    Ok(Box::pin(futures::stream::iter(vec![
                        Ok(ChatEvent::Token("recovered".into())),
                        Ok(ChatEvent::Done),
                    ])))
                }
            }
        }

        let provider = Arc::new(FlakyProvider { calls: std::sync::Mutex::new(0) });
        let events = collect(chat_with_retry(provider, request(true))).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Token(RETRY_NOTICE.into()),
                ChatEvent::Token("recovered".into()),
                ChatEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn usage_events_are_forwarded_but_do_not_count_as_content() {
        let usage = crate::Usage { input_tokens: 1, output_tokens: 0, total_tokens: 1 };
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ChatEvent::Usage(usage), ChatEvent::Done],
            vec![ChatEvent::Token("ok".into()), ChatEvent::Done],
        ]));
        let events = collect(chat_with_retry(provider.clone(), request(true))).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Usage(usage),
                ChatEvent::Token(RETRY_NOTICE.into()),
                ChatEvent::Token("ok".into()),
                ChatEvent::Done,
            ]
        );
    }
}
