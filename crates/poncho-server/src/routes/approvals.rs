// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveApprovalRequest {
    pub approved: bool,
}

pub async fn resolve(
    Path(approval_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResolveApprovalRequest>,
) -> Json<Value> {
    let resolved = state.approvals.resolve(&approval_id, body.approved).await;
    Json(json!({ "ok": resolved }))
}
