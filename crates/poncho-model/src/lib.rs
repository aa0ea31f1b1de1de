// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
mod mock;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedMockProvider, ScriptedTurn};
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;

use poncho_config::ModelSelection;

/// Errors of the model-client contract.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("model provider {0:?} is not bundled; inject a ModelProvider implementation for it")]
    ProviderNotBundled(String),
    #[error("model transport error: {0}")]
    Transport(String),
}

/// Construct a [`ModelProvider`] for a manifest's model selection.
///
/// The concrete model backends this core is expected to run against are
/// external collaborators: production callers inject their own
/// `ModelProvider` implementation built against a real API. Only the
/// deterministic mock providers ship here, so anything else is rejected at
/// load time with a descriptive error.
pub fn build_provider(selection: &ModelSelection) -> Result<Box<dyn ModelProvider>, ModelError> {
    match selection.provider.as_deref() {
        None | Some("mock") => {
            if let Some(name) = &selection.name {
                if catalog::lookup("mock", name).is_none() {
                    return Err(ModelError::ModelNotFound(name.clone()));
                }
            }
            Ok(Box::new(MockProvider))
        }
        Some(other) => Err(ModelError::ProviderNotBundled(other.to_string())),
    }
}
