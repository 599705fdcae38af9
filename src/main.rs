// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use quill_core::{Orchestrator, OrchestratorOptions, UiBridge};
use quill_model::Role;
use quill_tools::RegexIndexer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(quill_config::default_settings_path);
    let mut settings = quill_config::load(Some(&settings_path))?;

    if let Some(ws) = &cli.workspace {
        settings.last_workspace = Some(ws.clone());
    }
    if settings.last_workspace.is_none() {
        settings.last_workspace = Some(std::env::current_dir().context("resolving cwd")?);
    }
    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }

    let bridge = Arc::new(TerminalBridge::default());
    let orch = Arc::new(
        Orchestrator::new(
            settings,
            Arc::clone(&bridge) as Arc<dyn UiBridge>,
            Arc::new(RegexIndexer),
            OrchestratorOptions {
                settings_path: Some(settings_path),
                store_root: None,
                provider: None,
            },
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    match &cli.command {
        Some(Commands::Tools) => {
            for schema in orch.tools() {
                let gate = if schema.safe { "safe" } else { "needs approval" };
                println!("{:<12} [{gate}]", schema.name);
                for line in schema.description.lines() {
                    println!("    {line}");
                }
            }
            return Ok(());
        }
        Some(Commands::Chats) => {
            let chats = orch
                .list_conversations()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            if chats.is_empty() {
                println!("No saved conversations.");
                return Ok(());
            }
            println!("{:<38}  {:<20}  {:>5}  TITLE", "ID", "UPDATED", "MSGS");
            for c in chats {
                println!(
                    "{:<38}  {:<20}  {:>5}  {}",
                    c.id,
                    c.updated_at.format("%Y-%m-%d %H:%M"),
                    c.message_count,
                    c.title
                );
            }
            return Ok(());
        }
        None => {}
    }

    println!("quill — workspace {}", orch.workspace_root().display());
    if let Some(prompt) = cli.prompt.clone() {
        run_turn_with_stdin(&orch, &bridge, prompt).await;
        orch.shutdown();
        return Ok(());
    }

    repl(orch, bridge).await
}

/// Interactive loop.  Turns run as background tasks so approval prompts can
/// be answered while the model is working.
async fn repl(orch: Arc<Orchestrator>, bridge: Arc<TerminalBridge>) -> anyhow::Result<()> {
    println!("Commands: /new /chats /load <id> /model <provider:model> /cancel /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt_marker();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            prompt_marker();
            continue;
        }

        // A pending approval consumes the next input line.
        if let Some(id) = bridge.take_pending_approval() {
            let approved = matches!(line.as_str(), "y" | "Y" | "yes");
            orch.approve(&id, approved);
            continue;
        }

        let (cmd, rest) = match line.split_once(' ') {
            Some((a, b)) => (a.to_string(), b.trim().to_string()),
            None => (line.clone(), String::new()),
        };
        match (cmd.as_str(), rest.as_str()) {
            ("/quit", _) => break,
            ("/cancel", _) => {
                orch.cancel();
                prompt_marker();
            }
            ("/new", _) => {
                if let Err(e) = orch.new_conversation().await {
                    eprintln!("[quill] {e}");
                }
                prompt_marker();
            }
            ("/chats", _) => {
                match orch.list_conversations() {
                    Ok(chats) => {
                        for c in chats {
                            println!("{}  {}", c.id, c.title);
                        }
                    }
                    Err(e) => eprintln!("[quill] {e}"),
                }
                prompt_marker();
            }
            ("/load", id) if !id.is_empty() => {
                if let Err(e) = orch.load_conversation(id.trim()).await {
                    eprintln!("[quill] {e}");
                }
                prompt_marker();
            }
            ("/model", id) if !id.is_empty() => {
                if let Err(e) = orch.set_model(id.trim()) {
                    eprintln!("[quill] {e}");
                }
                prompt_marker();
            }
            _ => {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    let _ = orch.send_user_message(&line).await;
                });
            }
        }
    }

    orch.shutdown();
    Ok(())
}

/// One-shot mode: run a single turn while still answering approval prompts
/// from stdin.
async fn run_turn_with_stdin(
    orch: &Arc<Orchestrator>,
    bridge: &Arc<TerminalBridge>,
    prompt: String,
) {
    let turn = {
        let orch = Arc::clone(orch);
        tokio::spawn(async move { orch.send_user_message(&prompt).await })
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::pin!(turn);
    loop {
        tokio::select! {
            result = &mut turn => {
                if let Ok(Err(e)) = result {
                    eprintln!("[quill] {e}");
                }
                break;
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { continue };
                if let Some(id) = bridge.take_pending_approval() {
                    let approved = matches!(line.trim(), "y" | "Y" | "yes");
                    orch.approve(&id, approved);
                }
            }
        }
    }
}

fn prompt_marker() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

// ── Terminal bridge ──────────────────────────────────────────────────────────

/// Line-oriented [`UiBridge`]: streams assistant text to stdout and turns
/// approval prompts into `[y/N]` questions.
#[derive(Default)]
struct TerminalBridge {
    /// Bytes of the current assistant stream already printed.
    printed: Mutex<usize>,
    in_reasoning: Mutex<bool>,
    pending_approval: Mutex<Option<String>>,
}

impl TerminalBridge {
    fn take_pending_approval(&self) -> Option<String> {
        self.pending_approval.lock().unwrap().take()
    }
}

impl UiBridge for TerminalBridge {
    fn chat_new(&self, role: Role, content: &str) {
        match role {
            // User text is the echo of what was just typed; streamed
            // assistant text was already printed incrementally.
            Role::User | Role::Assistant => {}
            Role::Tool => {
                let first = content.lines().next().unwrap_or("");
                println!("[tool] {first}");
            }
            Role::System => println!("[system] {content}"),
        }
    }

    fn assistant_stream(&self, content: &str) {
        let mut printed = self.printed.lock().unwrap();
        if *printed > content.len() {
            *printed = 0;
        }
        print!("{}", &content[*printed..]);
        let _ = std::io::stdout().flush();
        *printed = content.len();
    }

    fn assistant_reasoning(&self, text: &str, done: bool) {
        let mut in_reasoning = self.in_reasoning.lock().unwrap();
        if done {
            if *in_reasoning {
                println!();
            }
            *in_reasoning = false;
            return;
        }
        if !*in_reasoning {
            print!("[reasoning] ");
            *in_reasoning = true;
        }
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn chat_clear(&self) {
        *self.printed.lock().unwrap() = 0;
        println!("\n--- new conversation ---");
        prompt_marker();
    }

    fn approval_prompt(&self, id: &str, summary: &str, diff: Option<&str>) {
        println!("\n[approval needed] {summary}");
        if let Some(diff) = diff {
            println!("{diff}");
        }
        print!("approve? [y/N] ");
        let _ = std::io::stdout().flush();
        *self.pending_approval.lock().unwrap() = Some(id.to_string());
    }

    fn busy(&self, busy: bool) {
        if !busy {
            *self.printed.lock().unwrap() = 0;
            println!();
            prompt_marker();
        }
    }

    fn open_file(&self, path: &str) {
        println!("[file] {path}");
    }

    fn system_notice(&self, text: &str) {
        println!("[quill] {text}");
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
