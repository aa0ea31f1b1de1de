// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context-window management. Two independent mechanisms:
//!
//! - [`build_compaction_prompt`] / [`emergency_compact`]: shrink the message
//!   history itself when it is approaching the model's context window.
//! - [`smart_truncate`]: shrink a single oversized tool result before it is
//!   appended to history, so one large output can't force a mid-step
//!   compaction on its own.

use poncho_model::{Message, Role};
use poncho_tools::OutputCategory;

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

/// Rewrites `messages` into a single summarisation request: the caller is
/// responsible for submitting it to the model and rebuilding the session
/// (system message, summary, preserved recent tail) from the response text —
/// this function only prepares the prompt.
pub fn build_compaction_prompt(messages: &mut Vec<Message>, system_msg: Option<Message>) -> usize {
    let before = messages.len();
    let history_text = serialize_history(messages);
    let summary_request = Message::user(format!("{SUMMARIZE_PROMPT}\n\n---\n\n{history_text}"));
    messages.clear();
    if let Some(sys) = system_msg {
        messages.push(sys);
    }
    messages.push(summary_request);
    before
}

/// Emergency fallback used when even the compaction prompt itself would
/// overflow the budget. Drops all but the last `keep_n` non-system
/// messages and prepends a canned notice. Deterministic — no model call,
/// always succeeds regardless of session size.
pub fn emergency_compact(messages: &mut Vec<Message>, system_msg: Option<Message>, keep_n: usize) -> usize {
    let before = messages.len();
    let non_system: Vec<Message> = messages.iter().filter(|m| m.role != Role::System).cloned().collect();
    let keep = keep_n.min(non_system.len());
    let preserved: Vec<Message> = non_system[non_system.len() - keep..].to_vec();
    let notice = Message::assistant(
        "[Context emergency-compacted: earlier history was dropped to prevent a \
         context-window overflow. Proceed carefully and ask for any missing \
         requirements to be re-provided if needed.]",
    );
    messages.clear();
    if let Some(sys) = system_msg {
        messages.push(sys);
    }
    messages.push(notice);
    messages.extend(preserved);
    before
}

/// Deterministic, content-aware tool-result truncation. Returns
/// `content` unchanged when it already fits within `cap_tokens`. Dispatches
/// on [`OutputCategory`] rather than tool name so this stays independent of
/// the concrete tool list.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                 use a more specific pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                 use read_file with offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars].rfind('\n').map(|p| p + 1).unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; content truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !matches!(m.role, Role::System))
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            format!("{role}: {}", m.prompt_text())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_history() -> Vec<Message> {
        vec![
            Message::system("You are a helpful assistant."),
            Message::user("What is Rust?"),
            Message::assistant("Rust is a systems programming language."),
            Message::user("Show me an example."),
            Message::assistant("fn main() { println!(\"Hello\"); }"),
        ]
    }

    #[test]
    fn build_compaction_prompt_collapses_to_system_plus_summary_request() {
        let mut messages = make_history();
        let sys = Message::system("replacement system prompt");
        let before = build_compaction_prompt(&mut messages, Some(sys));
        assert_eq!(before, 5);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].as_text().unwrap().contains("What is Rust?"));
    }

    #[test]
    fn build_compaction_prompt_without_system_message() {
        let mut messages = make_history();
        build_compaction_prompt(&mut messages, None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn emergency_compact_keeps_only_recent_tail() {
        let mut messages = make_history();
        let sys = Message::system("sys");
        emergency_compact(&mut messages, Some(sys), 1);
        // system + notice + 1 preserved message
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].as_text().unwrap().contains("emergency-compacted"));
    }

    #[test]
    fn emergency_compact_keep_n_larger_than_history_keeps_everything() {
        let mut messages = make_history();
        let before = emergency_compact(&mut messages, None, 100);
        assert_eq!(before, 5);
        // notice + all 4 non-system messages
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn smart_truncate_passthrough_when_under_cap() {
        let out = smart_truncate("short", OutputCategory::Generic, 1000);
        assert_eq!(out, "short");
    }

    #[test]
    fn smart_truncate_zero_cap_disables_truncation() {
        let content = "x".repeat(10_000);
        assert_eq!(smart_truncate(&content, OutputCategory::Generic, 0), content);
    }

    #[test]
    fn smart_truncate_generic_cuts_at_line_boundary() {
        let content = (0..200).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let out = smart_truncate(&content, OutputCategory::Generic, 20);
        assert!(out.contains("bytes omitted"));
        assert!(!out.ends_with("line 19"));
    }

    #[test]
    fn smart_truncate_head_tail_preserves_both_ends() {
        let content = (0..200).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let out = smart_truncate(&content, OutputCategory::HeadTail, 30);
        assert!(out.contains("line 0"));
        assert!(out.contains("line 199"));
        assert!(out.contains("lines"));
    }

    #[test]
    fn smart_truncate_match_list_keeps_only_leading_matches() {
        let content = (0..200).map(|i| format!("match {i}")).collect::<Vec<_>>().join("\n");
        let out = smart_truncate(&content, OutputCategory::MatchList, 20);
        assert!(out.contains("match 0"));
        assert!(!out.contains("match 199"));
    }

    #[test]
    fn smart_truncate_file_content_uses_wide_head_and_tail() {
        let content = (0..500).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let out = smart_truncate(&content, OutputCategory::FileContent, 50);
        assert!(out.contains("line 0"));
        assert!(out.contains("line 499"));
    }
}
