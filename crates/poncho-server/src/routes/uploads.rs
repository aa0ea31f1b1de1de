// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get(Path(key): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let Some(store) = &state.uploads else {
        return ApiError::not_found("no upload store configured").into_response();
    };
    match store.get(&key).await {
        Some((content_type, bytes)) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        None => ApiError::not_found(format!("no upload for key {key}")).into_response(),
    }
}
