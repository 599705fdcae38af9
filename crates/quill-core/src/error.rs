// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// Failure classes of the agent core.
///
/// Recovery is class-specific: `Adapter` and `EmptyResponse` are absorbed by
/// the retry policy, `Tool` / `Approval` / `Validation` become structured
/// tool results and the loop continues, `Protocol` and `Cancelled` terminate
/// the turn, and `Config` reaches the UI with remediation text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Adapter(String),
    #[error("model produced neither text nor a tool call")]
    EmptyResponse,
    #[error("tool arguments failed validation: {0}")]
    Parse(String),
    #[error("tool failed: {0}")]
    Tool(String),
    #[error("declined: {0}")]
    Approval(String),
    #[error("{message}")]
    Validation { code: String, message: String },
    #[error("conversation protocol violated: {0}")]
    Protocol(String),
    #[error("cancelled")]
    Cancelled,
}
