// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod schema;

pub use loader::{default_settings_path, load, save};
pub use schema::{
    AgentSettings, ApprovalSettings, EditSafetySettings, ProviderEndpoint, ProviderSettings,
    Settings,
};
