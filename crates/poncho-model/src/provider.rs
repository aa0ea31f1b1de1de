// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The model-client contract: one streaming operation, everything else
//! derived. A provider yields zero or more [`ResponseEvent::Chunk`]s and
//! then exactly one [`ResponseEvent::Final`] whose tool calls are already
//! materialized — argument deltas never leak to callers.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::types::{Completion, CompletionRequest, ResponseEvent};
use crate::ModelError;

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, ModelError>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier (`"mock"`, or an embedder's own backend name).
    fn name(&self) -> &str;

    /// The configured model's identifier.
    fn model_name(&self) -> &str;

    /// The one required operation: generate-stream. Implementations must
    /// fail with [`ModelError::ModelNotFound`] when the backend reports an
    /// unknown model, and [`ModelError::Transport`] for anything else.
    async fn stream(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError>;

    /// Non-streaming generation, derived by draining [`Self::stream`] and
    /// returning its final completion.
    async fn generate(&self, req: CompletionRequest) -> Result<Completion, ModelError> {
        let mut stream = self.stream(req).await?;
        let mut completion = None;
        while let Some(event) = stream.next().await {
            if let ResponseEvent::Final(c) = event? {
                completion = Some(c);
            }
        }
        completion.ok_or_else(|| ModelError::Transport("stream ended without a final completion".into()))
    }

    /// Context window of the configured model, when the catalog knows it.
    fn context_window(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    /// Output-token ceiling of the configured model, when the catalog knows it.
    fn max_output_tokens(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.max_output_tokens)
    }
}
