// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use quill_config::Settings;
use quill_memory::{ConversationStore, ConversationSummary, Rules, RulesStore, WorkflowRecorder};
use quill_model::{
    chat_with_retry, ChatEvent, ChatRequest, Message, ModelProvider, Role, ToolCall, ToolSchema,
    RETRY_NOTICE,
};
use quill_tools::{builtin_registry, path_hint, Indexer, Tool as _, ToolRegistry, FINALIZE_TOOL};

use crate::approval::{ApprovalBroker, ApprovalRequest};
use crate::bridge::UiBridge;
use crate::error::Error;
use crate::prompts::system_prompt;

/// Everything bound to one workspace root; a workspace switch builds a new
/// instance and installs it atomically.
struct WorkspaceState {
    root: PathBuf,
    registry: Arc<ToolRegistry>,
    store: Arc<ConversationStore>,
    recorder: Arc<WorkflowRecorder>,
    rules: Arc<RulesStore>,
}

impl WorkspaceState {
    fn open(
        root: &Path,
        settings: &Settings,
        indexer: Arc<dyn Indexer>,
        store_root: &Path,
    ) -> Result<Self, Error> {
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!(
                "workspace {} is not usable: {e}; open Settings and choose a workspace",
                root.display()
            ))
        })?;
        let registry = builtin_registry(&root, settings, indexer)
            .map_err(|e| Error::Config(format!("tool registry: {e}")))?;
        let store = ConversationStore::open(store_root, &root)
            .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))?;
        let recorder = WorkflowRecorder::new(store.project_dir());
        let rules = RulesStore::new(store_root, store.project_dir());
        Ok(Self {
            root,
            registry: Arc::new(registry),
            store: Arc::new(store),
            recorder: Arc::new(recorder),
            rules: Arc::new(rules),
        })
    }
}

/// Construction knobs that have no place in user settings.
#[derive(Default)]
pub struct OrchestratorOptions {
    /// Where `save_settings` persists; `None` keeps changes in memory.
    pub settings_path: Option<PathBuf>,
    /// Conversation/workflow store root; defaults to the per-user data dir.
    pub store_root: Option<PathBuf>,
    /// Fixed provider instance (tests, embedders).  When set, `set_model`
    /// only records the identifier and never rebuilds the adapter.
    pub provider: Option<Arc<dyn ModelProvider>>,
}

/// Emits `busy(true)` on construction and guarantees the matching
/// `busy(false)` on every exit path, including panics and cancellation.
struct BusyGuard {
    ui: Arc<dyn UiBridge>,
}

impl BusyGuard {
    fn new(ui: &Arc<dyn UiBridge>) -> Self {
        ui.busy(true);
        Self { ui: Arc::clone(ui) }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.ui.busy(false);
    }
}

enum Dispatch {
    Continue,
    Terminal,
}

/// The agent orchestrator: drives multi-turn, tool-using conversations with
/// streamed model output, approval gating, and durable per-project memory.
///
/// All dependencies are injected; there is no module-level state.  One
/// instance serves one workspace at a time; turns are serialized.
pub struct Orchestrator {
    settings: RwLock<Settings>,
    settings_path: Option<PathBuf>,
    store_root: PathBuf,
    provider: RwLock<Arc<dyn ModelProvider>>,
    provider_locked: bool,
    ws: RwLock<Arc<WorkspaceState>>,
    conversation: Mutex<quill_memory::Conversation>,
    ui: Arc<dyn UiBridge>,
    broker: ApprovalBroker,
    indexer: Arc<dyn Indexer>,
    /// Serializes turns; commands that mutate the conversation also take it.
    turn_lock: tokio::sync::Mutex<()>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        ui: Arc<dyn UiBridge>,
        indexer: Arc<dyn Indexer>,
        opts: OrchestratorOptions,
    ) -> Result<Self, Error> {
        let workspace = settings
            .last_workspace
            .clone()
            .ok_or_else(|| Error::Config("no workspace selected; open Settings".into()))?;

        let store_root = opts
            .store_root
            .unwrap_or_else(quill_memory::default_store_root);
        let ws = WorkspaceState::open(&workspace, &settings, Arc::clone(&indexer), &store_root)?;

        let (provider, provider_locked) = match opts.provider {
            Some(p) => (p, true),
            None => {
                let p = quill_model::from_settings(&settings)
                    .map_err(|e| Error::Config(e.to_string()))?;
                (Arc::from(p), false)
            }
        };

        let conversation = match ws.store.current_id() {
            Some(id) => ws
                .store
                .load(&id)
                .or_else(|_| ws.store.create())
                .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))?,
            None => ws
                .store
                .create()
                .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))?,
        };

        Ok(Self {
            settings: RwLock::new(settings),
            settings_path: opts.settings_path,
            store_root,
            provider: RwLock::new(provider),
            provider_locked,
            ws: RwLock::new(Arc::new(ws)),
            conversation: Mutex::new(conversation),
            ui,
            broker: ApprovalBroker::new(),
            indexer,
            turn_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(None),
        })
    }

    // ── Turn loop ────────────────────────────────────────────────────────────

    /// Run one user turn to completion.
    ///
    /// Serialized per orchestrator; `busy(true)`/`busy(false)` bracket every
    /// call exactly once regardless of how it exits.
    pub async fn send_user_message(&self, text: &str) -> Result<(), Error> {
        let _turn = self.turn_lock.lock().await;
        let _busy = BusyGuard::new(&self.ui);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.cancel.lock().unwrap() = Some(cancel_tx);

        let result = self.run_turn(text, &mut cancel_rx).await;
        *self.cancel.lock().unwrap() = None;

        if let Err(e) = &result {
            match e {
                Error::Cancelled => self.ui.system_notice("turn cancelled"),
                other => self.ui.system_notice(&other.to_string()),
            }
        }
        result
    }

    async fn run_turn(
        &self,
        text: &str,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(), Error> {
        self.append_message(Message::user(text));

        let agent = self.settings.read().unwrap().agent.clone();
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(agent.turn_timeout_secs);
        let mut rounds = 0u32;

        'turn: loop {
            if rounds >= agent.max_tool_rounds {
                self.ui.system_notice(&format!(
                    "tool-call budget ({} rounds) reached; finalizing turn",
                    agent.max_tool_rounds
                ));
                break;
            }
            rounds += 1;

            let (provider, req) = self.compose_request(agent.stream);
            debug!(round = rounds, messages = req.messages.len(), "invoking model");
            let mut stream = chat_with_retry(provider, req);

            let mut turn_text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            loop {
                let item = tokio::select! {
                    biased;
                    _ = &mut *cancel => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        self.ui.system_notice("turn wall-clock limit reached; finalizing");
                        self.materialize_text(&turn_text);
                        break 'turn;
                    }
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };
                match item {
                    Err(e) => {
                        // Post-retry adapter failure: surface and end the turn.
                        self.ui.system_notice(&format!("model error: {e}"));
                        self.materialize_text(&turn_text);
                        break 'turn;
                    }
                    Ok(ChatEvent::Token(t)) if t == RETRY_NOTICE => {
                        self.ui.system_notice(RETRY_NOTICE);
                    }
                    Ok(ChatEvent::Token(t)) => {
                        turn_text.push_str(&t);
                        self.ui.assistant_stream(&turn_text);
                        if !turn_text.trim().is_empty() {
                            self.conversation
                                .lock()
                                .unwrap()
                                .replace_streaming_tail(&turn_text);
                        }
                    }
                    Ok(ChatEvent::Reasoning { text, done }) => {
                        self.ui.assistant_reasoning(&text, done);
                    }
                    Ok(ChatEvent::Call(tc)) => calls.push(tc),
                    Ok(ChatEvent::Usage(u)) => {
                        self.ui.usage(u.input_tokens, u.output_tokens, u.total_tokens);
                    }
                    Ok(ChatEvent::Done) => break,
                }
            }

            self.materialize_text(&turn_text);

            if calls.is_empty() {
                break;
            }
            let mut finalized = false;
            for tc in &calls {
                if matches!(self.dispatch_tool(tc, cancel).await?, Dispatch::Terminal) {
                    finalized = true;
                }
            }
            if finalized {
                break;
            }
        }
        Ok(())
    }

    /// Persist the streamed assistant text as the materialized tail message.
    fn materialize_text(&self, turn_text: &str) {
        if turn_text.trim().is_empty() {
            return;
        }
        let conv_id = {
            let mut conv = self.conversation.lock().unwrap();
            conv.replace_streaming_tail(turn_text);
            conv.id.clone()
        };
        let ws = self.workspace();
        if let Err(e) = ws.store.append(&conv_id, &Message::assistant(turn_text)) {
            warn!(error = %e, "assistant message not persisted");
        }
        self.ui.chat_new(Role::Assistant, turn_text);
    }

    // ── Tool dispatch pipeline ───────────────────────────────────────────────

    async fn dispatch_tool(
        &self,
        tc: &ToolCall,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<Dispatch, Error> {
        let ws = self.workspace();
        let args_preview = tc.args.to_string();

        // 1. Record the tool_use before anything can fail.
        ws.recorder.tool_use(&tc.name, &tc.id, &args_preview);
        self.append_message(Message::tool_use(&tc.id, &tc.name, &tc.args));
        if let Some(p) = path_hint(&tc.args) {
            self.ui.open_file(&p);
        }

        // 2. Planning phase.
        let tool = ws.registry.get(&tc.name);
        let output = ws.registry.plan(tc).await;
        if output.is_error {
            ws.recorder.tool_result(&tc.name, &tc.id, false);
            self.append_tool_result(&tc.id, &tc.name, &output.content)?;
            self.ui.system_notice(&format!("{}: {}", tc.name, output.content));
            return Ok(Dispatch::Continue);
        }

        // 3. Safe tools complete immediately.
        let safe = tool.as_ref().map(|t| t.safe()).unwrap_or(false);
        if safe {
            ws.recorder.tool_result(&tc.name, &tc.id, true);
            self.append_tool_result(&tc.id, &tc.name, &output.content)?;
            return Ok(if tc.name == FINALIZE_TOOL {
                Dispatch::Terminal
            } else {
                Dispatch::Continue
            });
        }

        // 4. Unsafe: approval decision (auto flags short-circuit).
        let approved = if self.auto_approved(&tc.name) {
            true
        } else {
            let request = ApprovalRequest {
                id: tc.id.clone(),
                summary: output.content.clone(),
                diff: output.diff.clone(),
            };
            let rx = self.broker.prompt(&request);
            self.ui
                .approval_prompt(&request.id, &request.summary, request.diff.as_deref());
            tokio::select! {
                biased;
                // Abandon the dispatch before any side effect.
                _ = &mut *cancel => return Err(Error::Cancelled),
                decision = rx => decision.unwrap_or(false),
            }
        };
        ws.recorder.approval(&tc.name, &tc.id, approved);

        let payload = json!({
            "approved": approved,
            "diff": output.diff,
            "message": output.content,
        })
        .to_string();
        ws.recorder.tool_result(&tc.name, &tc.id, approved);
        self.append_tool_result(&tc.id, &tc.name, &payload)?;

        if !approved {
            return Ok(Dispatch::Continue);
        }

        // 5. Effect phase through the apply counterpart.
        if let Some(counterpart) = tool.as_ref().and_then(|t| t.apply_counterpart()) {
            let apply_call = ToolCall {
                id: format!("{}-apply", tc.id),
                name: counterpart.to_string(),
                args: tc.args.clone(),
            };
            ws.recorder.tool_use(counterpart, &apply_call.id, &args_preview);
            self.append_message(Message::tool_use(&apply_call.id, counterpart, &apply_call.args));

            let result = ws.registry.apply(&apply_call).await;
            for w in &result.warnings {
                self.ui.system_notice(w);
            }
            if result.is_error {
                self.ui
                    .system_notice(&format!("{counterpart}: {}", result.content));
            }
            ws.recorder.tool_result(counterpart, &apply_call.id, !result.is_error);
            self.append_tool_result(&apply_call.id, counterpart, &result.content)?;
        }
        Ok(Dispatch::Continue)
    }

    fn auto_approved(&self, tool_name: &str) -> bool {
        let approvals = self.settings.read().unwrap().approvals.clone();
        match tool_name {
            "run_shell" | "apply_shell" => approvals.auto_approve_shell,
            "edit_file" | "apply_edit" => approvals.auto_approve_edits,
            _ => false,
        }
    }

    // ── Conversation plumbing ────────────────────────────────────────────────

    fn workspace(&self) -> Arc<WorkspaceState> {
        self.ws.read().unwrap().clone()
    }

    fn append_message(&self, msg: Message) {
        let conv_id = {
            let mut conv = self.conversation.lock().unwrap();
            conv.push(msg.clone());
            conv.id.clone()
        };
        if let Err(e) = self.workspace().store.append(&conv_id, &msg) {
            warn!(error = %e, "message not persisted");
        }
        self.ui.chat_new(msg.role, &msg.content);
    }

    /// Append a tool result, enforcing the tool_use-parent invariant.  A
    /// violation is recorded at fatal severity and terminates the turn.
    fn append_tool_result(&self, id: &str, name: &str, content: &str) -> Result<(), Error> {
        let has_parent = self.conversation.lock().unwrap().has_tool_use(id);
        if !has_parent {
            self.workspace()
                .recorder
                .fatal(name, id, "tool result without matching tool_use");
            return Err(Error::Protocol(format!(
                "tool result {id} has no matching tool_use"
            )));
        }
        self.append_message(Message::tool_result(id, name, content));
        Ok(())
    }

    fn compose_request(&self, stream: bool) -> (Arc<dyn ModelProvider>, ChatRequest) {
        let ws = self.workspace();
        let rules = ws.rules.load();
        let mut messages = vec![Message::system(system_prompt(&ws.root, &rules))];
        messages.extend(self.conversation.lock().unwrap().snapshot());
        let req = ChatRequest { messages, tools: ws.registry.schemas(), stream };
        (self.provider.read().unwrap().clone(), req)
    }

    // ── UI commands ──────────────────────────────────────────────────────────

    /// Deliver an approval decision from the UI.
    pub fn approve(&self, id: &str, approved: bool) -> bool {
        self.broker.resolve(id, approved)
    }

    /// Cancel the in-flight turn, if any.
    pub fn cancel(&self) {
        if let Some(tx) = self.cancel.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Reject all pending approvals; call when the UI goes away.
    pub fn shutdown(&self) {
        self.broker.shutdown();
    }

    /// Start a fresh conversation.  An empty current conversation is reused
    /// so repeated calls do not accumulate shells.
    pub async fn new_conversation(&self) -> Result<(), Error> {
        let _turn = self.turn_lock.lock().await;
        {
            let conv = self.conversation.lock().unwrap();
            if conv.is_empty() {
                self.ui.chat_clear();
                return Ok(());
            }
        }
        let ws = self.workspace();
        let fresh = ws
            .store
            .create()
            .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))?;
        *self.conversation.lock().unwrap() = fresh;
        self.ui.chat_clear();
        Ok(())
    }

    /// Reset the conversation view and start over.
    pub async fn clear_conversation(&self) -> Result<(), Error> {
        self.new_conversation().await
    }

    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, Error> {
        self.workspace()
            .store
            .list()
            .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))
    }

    /// Load a stored conversation and replay it to the UI.
    pub async fn load_conversation(&self, id: &str) -> Result<(), Error> {
        let _turn = self.turn_lock.lock().await;
        let ws = self.workspace();
        let conv = ws
            .store
            .load(id)
            .map_err(|e| Error::Config(format!("conversation {id} unavailable: {e}")))?;
        ws.store
            .set_current(id)
            .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))?;
        self.ui.chat_clear();
        for msg in &conv.messages {
            self.ui.chat_new(msg.role, &msg.content);
        }
        *self.conversation.lock().unwrap() = conv;
        Ok(())
    }

    /// Switch the active model.  Repeated calls with the same identifier are
    /// no-ops.
    pub fn set_model(&self, model_id: &str) -> Result<(), Error> {
        if self.settings.read().unwrap().model == model_id {
            return Ok(());
        }
        if !self.provider_locked {
            let provider = quill_model::from_model_id(model_id, &self.settings.read().unwrap())
                .map_err(|e| Error::Config(e.to_string()))?;
            *self.provider.write().unwrap() = Arc::from(provider);
        }
        self.settings.write().unwrap().model = model_id.to_string();
        self.persist_settings();
        Ok(())
    }

    /// Switch to another workspace: a freshly built registry and store are
    /// installed atomically and a new conversation begins.
    pub async fn set_workspace(&self, path: &Path) -> Result<(), Error> {
        let _turn = self.turn_lock.lock().await;
        let settings = self.settings.read().unwrap().clone();
        let ws =
            WorkspaceState::open(path, &settings, Arc::clone(&self.indexer), &self.store_root)?;
        let fresh = ws
            .store
            .create()
            .map_err(|e| Error::Config(format!("conversation store unavailable: {e}")))?;
        let root = ws.root.clone();
        *self.ws.write().unwrap() = Arc::new(ws);
        *self.conversation.lock().unwrap() = fresh;
        self.settings.write().unwrap().last_workspace = Some(root);
        self.persist_settings();
        self.ui.chat_clear();
        Ok(())
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace().root.clone()
    }

    /// Tool surface for the UI's tool listing.
    pub fn tools(&self) -> Vec<ToolSchema> {
        self.workspace().registry.schemas()
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings.read().unwrap().clone()
    }

    /// Merge a partial settings object (as the UI exchanges it) into the
    /// current settings, rebuild what depends on them, and persist.
    pub fn save_settings(&self, patch: serde_json::Value) -> Result<(), Error> {
        let current = self.settings.read().unwrap().clone();
        let mut merged = serde_json::to_value(&current)
            .map_err(|e| Error::Config(format!("settings serialization: {e}")))?;
        merge_json(&mut merged, patch);
        let updated: Settings = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("invalid settings: {e}")))?;

        if !self.provider_locked && updated.model != current.model {
            let provider = quill_model::from_settings(&updated)
                .map_err(|e| Error::Config(e.to_string()))?;
            *self.provider.write().unwrap() = Arc::from(provider);
        }
        *self.settings.write().unwrap() = updated;
        self.persist_settings();
        Ok(())
    }

    fn persist_settings(&self) {
        if let Some(path) = &self.settings_path {
            let settings = self.settings.read().unwrap().clone();
            if let Err(e) = quill_config::save(&settings, Some(path.as_path())) {
                warn!(error = %e, "settings not persisted");
            }
        }
    }

    pub fn rules(&self) -> Rules {
        self.workspace().rules.load()
    }

    pub fn save_rules(&self, rules: &Rules) -> Result<(), Error> {
        self.workspace()
            .rules
            .save(rules)
            .map_err(|e| Error::Config(format!("rules not saved: {e}")))
    }

    /// Read-only view of the active conversation.
    pub fn snapshot(&self) -> Vec<Message> {
        self.conversation.lock().unwrap().snapshot()
    }

    /// Workflow log of the active project (audit trail).
    pub fn workflow_events(&self) -> Vec<quill_memory::WorkflowEvent> {
        self.workspace().recorder.read_all()
    }
}

/// Deep-merge `patch` into `dst`; patch wins on scalar conflicts.
fn merge_json(dst: &mut serde_json::Value, patch: serde_json::Value) {
    match (dst, patch) {
        (serde_json::Value::Object(d), serde_json::Value::Object(p)) => {
            for (k, v) in p {
                merge_json(d.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (dst, patch) => *dst = patch,
    }
}

#[cfg(test)]
mod merge_tests {
    use super::merge_json;
    use serde_json::json;

    #[test]
    fn scalar_patch_wins() {
        let mut dst = json!({"a": 1, "b": 2});
        merge_json(&mut dst, json!({"b": 9}));
        assert_eq!(dst, json!({"a": 1, "b": 9}));
    }

    #[test]
    fn nested_objects_merge() {
        let mut dst = json!({"agent": {"max_tool_rounds": 25, "stream": true}});
        merge_json(&mut dst, json!({"agent": {"max_tool_rounds": 5}}));
        assert_eq!(dst, json!({"agent": {"max_tool_rounds": 5, "stream": true}}));
    }

    #[test]
    fn new_keys_are_inserted() {
        let mut dst = json!({});
        merge_json(&mut dst, json!({"model": "claude:x"}));
        assert_eq!(dst, json!({"model": "claude:x"}));
    }
}
