// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The thin client library: a `reqwest`-based wrapper over the
//! conversation HTTP/SSE API.

use futures::{Stream, StreamExt};

use crate::events::ClientEvent;
use crate::sse::parse_sse_stream;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: reqwest::StatusCode, body: String },
    #[error("run ended in error: {code}: {message}")]
    RunError { code: String, message: String },
    #[error("run was cancelled")]
    Cancelled,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Accumulated result of [`AgentClient::send_message`], summed across any
/// transparent continuation follow-ups.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub text: String,
    pub steps: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

pub struct AgentClient {
    base_url: String,
    http: reqwest::Client,
    bearer: Option<String>,
    /// Safety cap on transparent continuation follow-ups so a model stuck in
    /// a `continuation:true` loop can't make `send_message` run forever.
    max_continuations: u32,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new(), bearer: None, max_continuations: 5 }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_max_continuations(mut self, max: u32) -> Self {
        self.max_continuations = max;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Open the raw event stream for one message. Does not auto-continue —
    /// use [`Self::send_message`] for the accumulate-and-continue behavior.
    pub async fn stream(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> ClientResult<impl Stream<Item = anyhow::Result<ClientEvent>>> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/api/conversations/{conversation_id}/messages"))
            .json(&serde_json::json!({ "message": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Server { status, body });
        }
        Ok(parse_sse_stream(resp.bytes_stream()))
    }

    /// Send one message and drive it to a synchronous result: accumulates
    /// usage/step counters across the stream, and — while the terminal
    /// `run:completed` carries `continuation:true` and the continuation
    /// budget allows it — transparently re-sends `"Continue"` and keeps
    /// summing.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> ClientResult<RunResult> {
        let mut result = RunResult::default();
        let mut next_input = text.to_string();

        for _ in 0..=self.max_continuations {
            let mut stream = Box::pin(self.stream(conversation_id, &next_input).await?);
            let mut continuation = false;

            while let Some(event) = stream.next().await {
                match event.map_err(|e| ClientError::Server { status: reqwest::StatusCode::BAD_GATEWAY, body: e.to_string() })? {
                    ClientEvent::StepCompleted { .. } => result.steps += 1,
                    ClientEvent::ModelResponse { usage } => {
                        result.input_tokens += usage.input;
                        result.output_tokens += usage.output;
                    }
                    ClientEvent::RunCompleted { text, continuation: cont, .. } => {
                        result.text = text;
                        continuation = cont;
                    }
                    ClientEvent::RunError { code, message } => return Err(ClientError::RunError { code, message }),
                    ClientEvent::RunCancelled {} => return Err(ClientError::Cancelled),
                    _ => {}
                }
            }

            if !continuation {
                return Ok(result);
            }
            next_input = "Continue".to_string();
        }
        Ok(result)
    }
}
