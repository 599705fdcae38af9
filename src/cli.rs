// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Headless shell for the quill assistant core.
#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "Approval-gated AI coding assistant")]
pub struct Cli {
    /// Workspace root; defaults to the last used workspace or the current
    /// directory.
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Model as provider:model_id (openai, claude, ollama).
    #[arg(long)]
    pub model: Option<String>,

    /// Settings file (default: ~/.config/quill/settings.yaml).
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Send one message, print the result, and exit.
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the tools the assistant can call.
    Tools,
    /// List saved conversations for this workspace.
    Chats,
}
