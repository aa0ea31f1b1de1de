// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Router assembly and the process entrypoint: one axum `Router` wiring the
//! full API surface behind the auth/CSRF/security-header middleware stack,
//! served with `axum::serve` over a plain TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::http::{auth, security};
use crate::routes;
use crate::state::AppState;

/// 10 MiB: generous enough for a `files` multipart part without letting an
/// unauthenticated-but-unbounded body stall a worker.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/api/conversations", get(routes::conversations::list).post(routes::conversations::create))
        .route(
            "/api/conversations/:id",
            get(routes::conversations::get).patch(routes::conversations::patch).delete(routes::conversations::delete),
        )
        .route("/api/conversations/:id/messages", post(routes::conversations::send_message))
        .route("/api/conversations/:id/events", get(routes::conversations::events))
        .route("/api/conversations/:id/stop", post(routes::conversations::stop))
        .route("/api/approvals/:approvalId", post(routes::approvals::resolve))
        .route("/api/uploads/:key", get(routes::uploads::get))
        .route("/api/cron/:jobName", get(routes::cron::run))
        .layer(axum::middleware::from_fn(security::csrf_guard))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::auth_mw::<Arc<AppState>>));

    let public = Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/auth/session", get(routes::auth_routes::session))
        .route("/api/auth/login", post(routes::auth_routes::login))
        .route("/api/auth/logout", post(routes::auth_routes::logout));

    public
        .merge(authenticated)
        .layer(axum::middleware::from_fn(security::security_headers))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` (port 0 picks a free one) and returns the bound address plus
/// the future driving the server; callers spawn or await the future. Split
/// from [`serve`] so embedders and tests can learn the ephemeral port.
pub async fn bind(
    addr: SocketAddr,
    state: Arc<AppState>,
) -> anyhow::Result<(SocketAddr, impl std::future::Future<Output = anyhow::Result<()>>)> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    Ok((bound, async move {
        axum::serve(listener, app).await?;
        Ok(())
    }))
}

/// Binds `addr` and serves the router until the process is killed. The
/// caller is expected to have already installed a tracing subscriber.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let (bound, server) = bind(addr, state).await?;
    tracing::info!(addr = %bound, "poncho server listening");
    server.await
}
