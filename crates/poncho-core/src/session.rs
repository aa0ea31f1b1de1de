// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The in-process working state of one run: the message log the next model
//! call will see, a token estimate against the context window, the run's
//! accumulated usage, and the tool-activity lines recorded since the last
//! assistant reply. Persistence is the store's job; this type only lives
//! for the duration of a run.

use poncho_model::{Message, Usage};

pub struct Session {
    pub messages: Vec<Message>,
    /// Approximate token footprint of `messages`.
    token_estimate: usize,
    /// Context window the estimate is budgeted against.
    context_window: usize,
    /// Usage summed across every model call of this run.
    pub usage: Usage,
    /// Tool-activity lines gathered since the last assistant reply; drained
    /// into that reply's `meta.sections` so transcripts replay without the
    /// event log.
    activity: Vec<String>,
}

impl Session {
    pub fn new(context_window: usize) -> Self {
        Self {
            messages: Vec::new(),
            token_estimate: 0,
            context_window,
            usage: Usage::default(),
            activity: Vec::new(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_estimate += msg.approx_tokens();
        self.messages.push(msg);
    }

    /// Replace the whole log (e.g. with a stored conversation's history)
    /// and re-derive the token estimate.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    /// Re-derive the token estimate after the log was edited in place
    /// (compaction does this).
    pub fn recalculate_tokens(&mut self) {
        self.token_estimate = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    pub fn token_estimate(&self) -> usize {
        self.token_estimate
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    /// Fraction of the context window the current log occupies (0.0–1.0).
    pub fn context_fraction(&self) -> f32 {
        if self.context_window == 0 {
            return 0.0;
        }
        self.token_estimate as f32 / self.context_window as f32
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Fold one model call's usage into the run total.
    pub fn add_usage(&mut self, usage: Usage) {
        self.usage.input += usage.input;
        self.usage.output += usage.output;
    }

    /// Record one tool-activity line ("echo: ok (3ms)") for the next
    /// assistant reply.
    pub fn note_activity(&mut self, line: impl Into<String>) {
        self.activity.push(line.into());
    }

    /// Append the step's assistant reply, attaching and draining any
    /// recorded tool activity into its `meta.sections`.
    pub fn push_assistant_reply(&mut self, text: impl Into<String>, step: u32) {
        let sections = std::mem::take(&mut self.activity);
        self.push(Message::assistant_reply(text, step, sections));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_empty() {
        let s = Session::new(1000);
        assert!(s.messages.is_empty());
        assert_eq!(s.token_estimate(), 0);
        assert_eq!(s.usage, Usage::default());
    }

    #[test]
    fn push_grows_the_token_estimate() {
        let mut s = Session::new(1000);
        s.push(Message::user("12345678"));
        assert_eq!(s.token_estimate(), 2);
    }

    #[test]
    fn replace_messages_rederives_the_estimate() {
        let mut s = Session::new(1000);
        s.push(Message::user("first"));
        s.push(Message::assistant("reply"));
        s.replace_messages(vec![Message::user("only")]);
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.token_estimate(), 1);
    }

    #[test]
    fn recalculate_after_in_place_edit() {
        let mut s = Session::new(1000);
        s.push(Message::user("text"));
        s.messages.clear();
        s.recalculate_tokens();
        assert_eq!(s.token_estimate(), 0);
    }

    #[test]
    fn context_fraction_handles_zero_window() {
        assert_eq!(Session::new(0).context_fraction(), 0.0);
    }

    #[test]
    fn near_limit_trips_at_the_threshold() {
        let mut s = Session::new(10);
        s.push(Message::user("12345678901234567890")); // 5 tokens
        assert!(s.is_near_limit(0.5));
        assert!(!s.is_near_limit(0.6));
    }

    #[test]
    fn usage_accumulates_across_calls() {
        let mut s = Session::new(1000);
        s.add_usage(Usage { input: 10, output: 4 });
        s.add_usage(Usage { input: 7, output: 3 });
        assert_eq!(s.usage, Usage { input: 17, output: 7 });
    }

    #[test]
    fn assistant_reply_drains_recorded_activity_into_sections() {
        let mut s = Session::new(1000);
        s.note_activity("echo: ok (3ms)");
        s.note_activity("write_file: denied");
        s.push_assistant_reply("done", 2);

        let last = s.messages.last().unwrap();
        assert_eq!(last.meta.step, Some(2));
        assert_eq!(last.meta.sections.len(), 2);

        // Drained: the next reply starts with a clean slate.
        s.push_assistant_reply("again", 3);
        assert!(s.messages.last().unwrap().meta.sections.is_empty());
    }
}
