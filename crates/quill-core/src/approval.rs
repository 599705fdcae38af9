// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

/// A pending request for user authorization of a side effect.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// Correlates the prompt with the decision; unique per request.
    pub id: String,
    pub summary: String,
    pub diff: Option<String>,
}

/// Correlates approval prompts with decisions arriving from the UI.
///
/// Each id resolves exactly once: the first `resolve` wins, duplicates are
/// ignored, and `shutdown` rejects everything still outstanding.
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    /// Register `request` and return its decision future.  A dropped sender
    /// (shutdown, duplicate id replacement) reads as rejected.
    pub fn prompt(&self, request: &ApprovalRequest) -> oneshot::Receiver<bool> {
        self.register(&request.id)
    }

    pub fn register(&self, id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    /// Deliver a decision.  Returns false when the id is unknown or already
    /// resolved.
    pub fn resolve(&self, id: &str, approved: bool) -> bool {
        match self.pending.lock().unwrap().remove(id) {
            Some(tx) => {
                debug!(request = id, approved, "approval resolved");
                tx.send(approved).is_ok()
            }
            None => {
                debug!(request = id, "ignoring duplicate or unknown approval");
                false
            }
        }
    }

    /// Reject everything still pending (shutdown path).
    pub fn shutdown(&self) {
        let drained: Vec<(String, oneshot::Sender<bool>)> =
            self.pending.lock().unwrap().drain().collect();
        for (id, tx) in drained {
            debug!(request = %id, "rejecting unresolved approval on shutdown");
            let _ = tx.send(false);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Default for ApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
