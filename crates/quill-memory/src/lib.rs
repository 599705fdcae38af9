// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod conversation;
mod rules;
mod store;
mod workflow;

pub use conversation::Conversation;
pub use rules::{Rules, RulesStore};
pub use store::{default_store_root, project_id, ConversationStore, ConversationSummary};
pub use workflow::{WorkflowEvent, WorkflowKind, WorkflowRecorder};
