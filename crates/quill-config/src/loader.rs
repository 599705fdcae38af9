// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Settings;

/// Default settings file location: `~/.config/quill/settings.yaml`.
pub fn default_settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/quill/settings.yaml")
}

/// Load settings from `path` (or the default location), falling back to
/// defaults when the file does not exist.  A file that exists but fails to
/// parse is an error — silently ignoring it would mask typos in the user's
/// provider keys.
pub fn load(path: Option<&Path>) -> anyhow::Result<Settings> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_settings_path);

    if !path.is_file() {
        debug!(path = %path.display(), "no settings file; using defaults");
        return Ok(serde_yaml::from_str("{}").expect("empty mapping deserializes"));
    }

    debug!(path = %path.display(), "loading settings");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let settings: Settings =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(settings)
}

/// Persist settings to `path` (or the default location), creating parent
/// directories as needed.
pub fn save(settings: &Settings, path: Option<&Path>) -> anyhow::Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_settings_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_yaml::to_string(settings).context("serializing settings")?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
