// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod approval;
mod compact;
mod events;
mod orchestrator;
mod session;

pub use approval::{ApprovalArbiter, ApprovalOutcome, DecisionFn, PendingApprovalInfo};
pub use compact::{build_compaction_prompt, emergency_compact, smart_truncate};
pub use events::RunEvent;
pub use orchestrator::{Orchestrator, RunConfig, RunOutcome};
pub use session::Session;
