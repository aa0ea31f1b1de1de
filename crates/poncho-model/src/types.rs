// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The conversation data model and the wire shapes of the model-client
//! contract.
//!
//! A [`Message`] carries either plain text, an ordered list of parts (text
//! or file references), an assistant's recorded tool call, or a tool
//! result. Assistant messages that came out of a tool-using run carry their
//! tool activity in [`MessageMeta::sections`], so a transcript can be
//! replayed without the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A reference to file content attached to a message. The bytes themselves
/// live wherever the reference points; only `Base64` carries them inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileRef {
    /// Inline base64 content with its media type.
    Base64 { media_type: String, data: String },
    /// A `data:` URI.
    DataUri { uri: String },
    /// An `https://` URL.
    Url { url: String },
    /// An opaque key resolvable through the upload store.
    UploadKey { key: String },
}

impl FileRef {
    /// Short placeholder used when the file itself cannot be forwarded
    /// (e.g. when flattening a message for a text-only consumer).
    pub fn placeholder(&self) -> String {
        match self {
            FileRef::Base64 { media_type, .. } => format!("[file: {media_type}]"),
            FileRef::DataUri { .. } => "[file: data uri]".to_string(),
            FileRef::Url { url } => format!("[file: {url}]"),
            FileRef::UploadKey { key } => format!("[file: upload {key}]"),
        }
    }
}

/// One element of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    File { file: FileRef },
}

/// An assistant's recorded request to invoke a tool. Appended to history so
/// the model sees its own request on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool: String,
    pub arguments: Value,
}

/// A tool's result, paired to the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub content: String,
}

/// The body of a message. Untagged: a bare string, a part list, and the two
/// tool record shapes are mutually unambiguous on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    ToolCall(ToolCallRecord),
    ToolResult(ToolResultRecord),
}

/// Optional per-message bookkeeping. Everything here is advisory; absence
/// of any field never changes how a message is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    /// Step of the run that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    /// Tool-activity lines for an assistant message that used tools, so a
    /// transcript can be replayed without consulting the event log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
}

impl MessageMeta {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.timestamp.is_none()
            && self.token_count.is_none()
            && self.step.is_none()
            && self.sections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "MessageMeta::is_empty")]
    pub meta: MessageMeta,
}

impl Message {
    fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self { role, content: MessageContent::Text(text.into()), meta: MessageMeta::default() }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::User, content: MessageContent::Parts(parts), meta: MessageMeta::default() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text)
    }

    /// An assistant reply produced by a tool-using run: `sections` carries
    /// the run's tool-activity lines, `step` the step that emitted it.
    pub fn assistant_reply(text: impl Into<String>, step: u32, sections: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            meta: MessageMeta { step: Some(step), sections, ..MessageMeta::default() },
        }
    }

    /// The assistant's own record of a tool call it requested.
    pub fn tool_call(call_id: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall(ToolCallRecord {
                call_id: call_id.into(),
                tool: tool.into(),
                arguments,
            }),
            meta: MessageMeta::default(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult(ToolResultRecord {
                call_id: call_id.into(),
                content: content.into(),
            }),
            meta: MessageMeta::default(),
        }
    }

    /// The plain text of a `Text` body, or of a part list consisting only of
    /// text parts. `None` for tool records and part lists carrying files.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Parts(parts) => match parts.as_slice() {
                [ContentPart::Text { text }] => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Flattens any body into prompt-ready text. File parts become short
    /// placeholders; tool records render as bracketed one-liners.
    pub fn prompt_text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::File { file } => file.placeholder(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            MessageContent::ToolCall(r) => format!("[tool_call: {}({})]", r.tool, r.arguments),
            MessageContent::ToolResult(r) => format!("[tool_result: {}]", r.content),
        }
    }

    /// Rough token estimate (4 characters per token) over the flattened
    /// body. Good enough for context budgeting; never used for billing.
    pub fn approx_tokens(&self) -> usize {
        self.prompt_text().len() / 4
    }
}

// ─── Model-client contract ────────────────────────────────────────────────────

/// A tool surfaced to the model: name, description, JSON-Schema parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Input to one `generate-stream` call.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Already-rendered system prompt; prompt assembly is the caller's job.
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Model name override; `None` uses the provider's configured model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A tool invocation requested in a [`Completion`]. Arguments are fully
/// materialized JSON — providers that stream argument deltas buffer them
/// internally before emitting the final event.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

/// The single terminal item of a response stream.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Full response text (the concatenation of all streamed chunks).
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
    /// Provider-specific raw content, kept opaque for callers that need it.
    pub raw: Option<Value>,
}

/// One item of a response stream: zero or more `Chunk`s followed by exactly
/// one `Final`.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    Chunk(String),
    Final(Completion),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
