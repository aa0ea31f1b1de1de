// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! `event:`/`data:` SSE line framing: a carry-forward buffer absorbs lines
//! split across TCP chunks, and only complete lines are consumed per poll.
//! The `event:` line names the event type; the `data:` payload carries the
//! remaining fields, so the two are recombined before deserializing.

use futures::{Stream, StreamExt};

use crate::events::ClientEvent;

/// One raw SSE frame before its `data:` payload is parsed as JSON.
#[derive(Debug, Clone, Default)]
struct RawFrame {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl RawFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data_lines.is_empty()
    }

    /// Recombine the `event:` line with the `data:` JSON into the tagged
    /// envelope [`ClientEvent`] deserializes from. An explicit `type` field
    /// already present in the payload wins over the `event:` line.
    fn into_event(self) -> Option<ClientEvent> {
        let data = self.data_lines.join("\n");
        let mut value: serde_json::Value = serde_json::from_str(&data).ok()?;
        if let (Some(kind), Some(obj)) = (self.event, value.as_object_mut()) {
            obj.entry("type").or_insert(serde_json::Value::String(kind));
        }
        serde_json::from_value(value).ok()
    }
}

/// Parses a byte stream (a `reqwest` response body) into [`ClientEvent`]s.
/// Frames with a body that doesn't parse as a recognized event are skipped
/// rather than failing the whole stream — a malformed or unexpected frame on
/// the wire shouldn't take down an otherwise-healthy run.
pub fn parse_sse_stream<S, E>(byte_stream: S) -> impl Stream<Item = anyhow::Result<ClientEvent>>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    byte_stream
        .scan((String::new(), RawFrame::default()), |(buf, frame), chunk| {
            let text = match chunk {
                Ok(b) => String::from_utf8_lossy(&b).to_string(),
                Err(e) => return futures::future::ready(Some(vec![Err(anyhow::anyhow!("{e}"))])),
            };
            buf.push_str(&text);
            let mut parsed = Vec::new();
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                if line.is_empty() {
                    if !frame.is_empty() {
                        let complete = std::mem::take(frame);
                        match complete.into_event() {
                            Some(ev) => parsed.push(Ok(ev)),
                            None => tracing::debug!("dropping unparseable SSE frame"),
                        }
                    }
                    continue;
                }
                if let Some(kind) = line.strip_prefix("event:") {
                    frame.event = Some(kind.trim_start().to_string());
                } else if let Some(data) = line.strip_prefix("data:") {
                    frame.data_lines.push(data.trim_start().to_string());
                }
            }
            futures::future::ready(Some(parsed))
        })
        .flat_map(futures::stream::iter)
}
