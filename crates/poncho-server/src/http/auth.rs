// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Authentication: a bearer API token for programmatic clients (the
//! `poncho-client` library), and a passphrase login producing a cookie
//! session plus a paired CSRF token for browser clients.
//!
//! The raw bearer token and login passphrase are never stored — only their
//! SHA-256 hashes, compared in constant time via [`subtle::ConstantTimeEq`]
//! through [`crate::crypto::token::StoredToken`].
//!
//! Failed login attempts are rate-limited per IP via `governor` (GCRA); five
//! failures per minute triggers a lockout, mirroring the bearer-auth
//! middleware this was generalized from. Loopback addresses are exempt.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::crypto::token::StoredToken;
use crate::error::ApiError;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

#[derive(Debug, Clone)]
pub struct Session {
    pub owner_id: String,
    pub csrf_token: String,
}

/// Auth state shared across the whole router.
#[derive(Clone)]
pub struct AuthState {
    api_token: Option<Arc<StoredToken>>,
    login_passphrase: Option<Arc<StoredToken>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    login_limiter: Arc<IpLimiter>,
}

impl AuthState {
    pub fn new(api_token: Option<StoredToken>, login_passphrase: Option<StoredToken>) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(5).unwrap()).allow_burst(NonZeroU32::new(2).unwrap());
        Self {
            api_token: api_token.map(Arc::new),
            login_passphrase: login_passphrase.map(Arc::new),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            login_limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// `Ok(None)` on a wrong passphrase, `Err` on rate-limit lockout.
    pub async fn login(&self, ip: IpAddr, passphrase: &str) -> Result<Option<(String, Session)>, ()> {
        let Some(expected) = &self.login_passphrase else {
            return Ok(None);
        };
        if !expected.verify(passphrase) {
            if !is_loopback(ip) && self.login_limiter.check_key(&ip).is_err() {
                warn!(%ip, "login rate limit exceeded");
                return Err(());
            }
            return Ok(None);
        }
        let session_id = Uuid::new_v4().to_string();
        let session = Session { owner_id: format!("session:{session_id}"), csrf_token: Uuid::new_v4().to_string() };
        self.sessions.lock().await.insert(session_id.clone(), session.clone());
        Ok(Some((session_id, session)))
    }

    pub async fn logout(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Trait for state types that carry auth info, so the middleware doesn't
/// need to be generic over the whole `AppState` shape.
pub trait AsAuthState {
    fn auth_state(&self) -> &AuthState;
}

/// The caller identity established by [`auth_mw`], available to handlers via
/// a request extension.
#[derive(Debug, Clone)]
pub struct Identity {
    pub owner_id: String,
}

/// Verifies a bearer token or a session-cookie-plus-CSRF-token pair.
/// Mutating requests authenticated by session additionally require a
/// matching `X-CSRF-Token` header, since browser cookies are sent
/// automatically by the browser and are not proof of intent on their own.
pub async fn auth_mw<S>(State(state): State<S>, ConnectInfo(addr): ConnectInfo<SocketAddr>, mut req: Request, next: Next) -> Response
where
    S: AsAuthState + Clone + Send + Sync + 'static,
{
    let auth = state.auth_state();

    if let Some(token) = extract_bearer(req.headers()) {
        if let Some(expected) = &auth.api_token {
            if expected.verify(token) {
                req.extensions_mut().insert(Identity { owner_id: "bearer".to_string() });
                return next.run(req).await;
            }
        }
        warn!(ip = %addr.ip(), "bearer authentication failed");
        return ApiError::unauthorized("invalid bearer token").into_response();
    }

    if let Some(session_id) = extract_session_cookie(req.headers()) {
        if let Some(session) = auth.session(&session_id).await {
            if is_mutating(req.method()) {
                let provided = req.headers().get("x-csrf-token").and_then(|v| v.to_str().ok());
                if provided != Some(session.csrf_token.as_str()) {
                    return ApiError::forbidden("missing or mismatched CSRF token").into_response();
                }
            }
            req.extensions_mut().insert(Identity { owner_id: session.owner_id.clone() });
            return next.run(req).await;
        }
    }

    ApiError::unauthorized("authentication required").into_response()
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
}

pub const SESSION_COOKIE_NAME: &str = "poncho_session";

fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookie_header.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (name, value) = pair.split_once('=')?;
        (name == SESSION_COOKIE_NAME).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_from_valid_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer my-token-123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("my-token-123"));
    }

    #[test]
    fn extract_bearer_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_bearer(&headers).is_none());
    }

    #[test]
    fn extract_session_cookie_from_multiple_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, "other=1; poncho_session=abc123; more=2".parse().unwrap());
        assert_eq!(extract_session_cookie(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_session_cookie_missing() {
        let headers = HeaderMap::new();
        assert!(extract_session_cookie(&headers).is_none());
    }

    #[tokio::test]
    async fn login_with_correct_passphrase_creates_a_session() {
        let state = AuthState::new(None, Some(StoredToken::from_hex(&hex::encode(sha256_of("secret"))).unwrap()));
        let result = state.login(IpAddr::V4(Ipv4Addr::LOCALHOST), "secret").await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn login_with_wrong_passphrase_returns_none() {
        let state = AuthState::new(None, Some(StoredToken::from_hex(&hex::encode(sha256_of("secret"))).unwrap()));
        let result = state.login(IpAddr::V4(Ipv4Addr::LOCALHOST), "wrong").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn logout_removes_the_session() {
        let state = AuthState::new(None, Some(StoredToken::from_hex(&hex::encode(sha256_of("secret"))).unwrap()));
        let (session_id, _) = state.login(IpAddr::V4(Ipv4Addr::LOCALHOST), "secret").await.unwrap().unwrap();
        assert!(state.session(&session_id).await.is_some());
        state.logout(&session_id).await;
        assert!(state.session(&session_id).await.is_none());
    }

    fn sha256_of(s: &str) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        Sha256::digest(s.as_bytes()).into()
    }
}
