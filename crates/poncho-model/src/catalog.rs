// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static metadata for the bundled providers, keyed by `(provider, model)`.
//! The orchestrator reads context windows from here for its token budget;
//! an embedder wiring a real backend ships its own entries alongside its
//! [`crate::ModelProvider`] implementation.

use serde::{Deserialize, Serialize};

/// Metadata for a single model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Provider identifier (e.g. `"mock"`).
    pub provider: String,
    /// Total context window in tokens (input + output).
    pub context_window: u32,
    /// Maximum output tokens per completion.
    pub max_output_tokens: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// All entries of the bundled catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    // The file ships inside the crate; a parse failure is a build defect,
    // not a runtime condition.
    let parsed: CatalogFile = serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    parsed.models
}

/// Look up one model by provider and id (display names also match).
pub fn lookup(provider: &str, model: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == model || e.name == model))
}

/// Context window for a model, or `default` when unknown.
pub fn context_window(provider: &str, model: &str, default: u32) -> u32 {
    lookup(provider, model).map(|e| e.context_window).unwrap_or(default)
}

/// Max output tokens for a model, or `default` when unknown.
pub fn max_output_tokens(provider: &str, model: &str, default: u32) -> u32 {
    lookup(provider, model).map(|e| e.max_output_tokens).unwrap_or(default)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_catalog_parses_and_is_non_empty() {
        assert!(!static_catalog().is_empty());
    }

    #[test]
    fn lookup_matches_by_id_and_by_display_name() {
        assert!(lookup("mock", "mock-small").is_some());
        assert!(lookup("mock", "Mock Small").is_some());
        assert!(lookup("mock", "nonexistent-model-xyz").is_none());
    }

    #[test]
    fn context_window_falls_back_for_unknown_models() {
        assert_eq!(context_window("mock", "no-such-model", 4096), 4096);
        assert_ne!(context_window("mock", "mock-small", 4096), 4096);
    }

    #[test]
    fn every_entry_carries_sane_limits() {
        for entry in static_catalog() {
            assert!(entry.context_window > 0, "{} has zero context_window", entry.id);
            assert!(entry.max_output_tokens > 0, "{} has zero max_output_tokens", entry.id);
            assert!(entry.max_output_tokens <= entry.context_window, "{}", entry.id);
        }
    }
}
