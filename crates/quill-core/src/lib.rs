// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod approval;
mod bridge;
mod error;
mod orchestrator;
mod prompts;

pub use approval::{ApprovalBroker, ApprovalRequest};
pub use bridge::{RecordingBridge, UiBridge, UiEvent};
pub use error::Error;
pub use orchestrator::{Orchestrator, OrchestratorOptions};
