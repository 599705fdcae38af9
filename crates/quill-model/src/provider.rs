// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{ChatEvent, ChatRequest};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatEvent>> + Send>>;

/// Uniform contract over heterogeneous provider wire protocols.
///
/// `chat` returns a finite, non-restartable event stream.  Implementations
/// must complete the stream promptly when the caller drops it; any pending
/// HTTP response is released with the stream.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider id for status display (`"openai"`, `"claude"`, `"ollama"`).
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a chat request and return the assembled event stream.
    ///
    /// HTTP-level rejections (non-2xx) are surfaced *in* the stream as a
    /// single text token carrying status and body, never silently dropped.
    /// Transport failures (connect/TLS) are returned as `Err`.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<EventStream>;
}
