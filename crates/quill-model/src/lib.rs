// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod sse;
mod anthropic;
mod mock;
mod openai;
mod provider;
mod retry;
mod types;

pub use anthropic::AnthropicProvider;
pub use mock::ScriptedProvider;
pub use openai::OpenAiProvider;
pub use provider::{EventStream, ModelProvider};
pub use retry::{chat_with_retry, RETRY_NOTICE};
pub use types::*;

use anyhow::bail;
use quill_config::Settings;

/// Split a `provider:model_id` identifier.
///
/// The colon form is the one the UI exchanges with the core
/// (`set_model("claude:claude-sonnet-4-5")`); model ids themselves may
/// contain further colons, so only the first one splits.
pub fn parse_model_id(s: &str) -> anyhow::Result<(&str, &str)> {
    match s.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => bail!("model identifier must be \"provider:model_id\", got {s:?}"),
    }
}

/// Construct a boxed [`ModelProvider`] for the settings' active model.
///
/// Providers: `openai`, `claude` (Anthropic messages API), `ollama`
/// (OpenAI-compatible local runtime, no key required).
pub fn from_settings(settings: &Settings) -> anyhow::Result<Box<dyn ModelProvider>> {
    from_model_id(&settings.model, settings)
}

/// Construct a provider for an explicit `provider:model_id`, taking
/// endpoints and credentials from `settings`.
pub fn from_model_id(
    model_id: &str,
    settings: &Settings,
) -> anyhow::Result<Box<dyn ModelProvider>> {
    let (provider, model) = parse_model_id(model_id)?;
    let prefixes = settings.agent.reasoning_model_prefixes.clone();

    match provider {
        "openai" => {
            let ep = &settings.providers.openai;
            Ok(Box::new(OpenAiProvider::new(
                "openai",
                model.to_string(),
                ep.resolve_api_key("OPENAI_API_KEY"),
                ep.base_url.as_deref().unwrap_or("https://api.openai.com/v1"),
                ep.max_tokens,
                ep.temperature,
                prefixes,
            )))
        }
        "claude" => {
            let ep = &settings.providers.claude;
            Ok(Box::new(AnthropicProvider::new(
                model.to_string(),
                ep.resolve_api_key("ANTHROPIC_API_KEY"),
                ep.base_url.clone(),
                ep.max_tokens,
                ep.temperature,
            )))
        }
        "ollama" => {
            let ep = &settings.providers.ollama;
            Ok(Box::new(OpenAiProvider::new(
                "ollama",
                model.to_string(),
                None,
                ep.base_url.as_deref().unwrap_or("http://localhost:11434/v1"),
                ep.max_tokens,
                ep.temperature,
                prefixes,
            )))
        }
        other => bail!(
            "unknown model provider: {other:?}\n\
             Known providers: openai, claude, ollama"
        ),
    }
}
