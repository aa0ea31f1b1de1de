// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod gating;
pub mod registry;
pub mod remote;
pub mod skills;
pub mod tool;

pub use gating::{ApprovalPolicy, ToolGate, ToolPattern};
pub use registry::{ToolRegistry, ToolSchema, ToolSource};
pub use remote::{RemoteTool, RemoteToolClient};
pub use skills::{discover_skills, read_skill_body, SkillCatalog, SkillManifest};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};

pub use builtin::list_directory::ListDirectoryTool;
pub use builtin::memory::{ConversationRecall, ConversationRecallTool, MemoryGetTool, MemoryStore, MemoryUpdateTool};
pub use builtin::read_file::ReadFileTool;
pub use builtin::skill_tools::{ActivateSkillTool, ListSkillScriptsTool, ReadSkillResourceTool, RunSkillScriptTool};
pub use builtin::write_file::{write_enabled, WriteFileTool};
