// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::http::auth::SESSION_COOKIE_NAME;
use crate::state::AppState;

pub async fn session(headers: axum::http::HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session_id = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookie_header| {
            cookie_header.split(';').find_map(|pair| {
                let pair = pair.trim();
                let (name, value) = pair.split_once('=')?;
                (name == SESSION_COOKIE_NAME).then(|| value.to_string())
            })
        });

    match session_id {
        Some(id) => match state.auth.session(&id).await {
            Some(session) => Json(json!({
                "authenticated": true,
                "sessionId": id,
                "ownerId": session.owner_id,
                "csrfToken": session.csrf_token,
            })),
            None => Json(json!({ "authenticated": false })),
        },
        None => Json(json!({ "authenticated": false })),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub passphrase: String,
}

pub async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    match state.auth.login(addr.ip(), &body.passphrase).await {
        Ok(Some((session_id, session))) => {
            let cookie = format!("{SESSION_COOKIE_NAME}={session_id}; HttpOnly; SameSite=Strict; Path=/");
            (
                [(header::SET_COOKIE, cookie)],
                Json(json!({ "ok": true, "sessionId": session_id, "csrfToken": session.csrf_token })),
            )
                .into_response()
        }
        Ok(None) => ApiError::unauthorized("invalid passphrase").into_response(),
        Err(()) => ApiError::too_many_requests("too many login attempts").into_response(),
    }
}

pub async fn logout(headers: axum::http::HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Some(session_id) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()).and_then(|cookie_header| {
        cookie_header.split(';').find_map(|pair| {
            let pair = pair.trim();
            let (name, value) = pair.split_once('=')?;
            (name == SESSION_COOKIE_NAME).then(|| value.to_string())
        })
    }) {
        state.auth.logout(&session_id).await;
    }
    Json(json!({ "ok": true }))
}
