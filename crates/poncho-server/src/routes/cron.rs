// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn run(
    Path(job_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(runner) = &state.cron else {
        return ApiError::not_found("no cron task runner configured").into_response();
    };
    let continue_conversation_id = params.get("continue").cloned();
    match runner.run(&job_name, continue_conversation_id).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => ApiError::internal(e.to_string()).into_response(),
    }
}
