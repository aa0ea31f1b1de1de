// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Hardening middleware: a fixed set of security headers stamped onto every
//! response, and a cross-origin guard on mutating requests.
//!
//! The cross-origin guard runs as defence-in-depth alongside the
//! session-cookie `X-CSRF-Token` check in `auth.rs`. Bearer-authenticated
//! requests carry no ambient credential a browser could forge, so the guard
//! matters most for the cookie path. Non-browser clients (curl, `reqwest`,
//! native apps) typically send neither `Origin` nor `Referer` and pass
//! through untouched.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Headers stamped onto every response. HSTS is included even though the
/// server defaults to loopback-only, so exposing it over a LAN later does
/// not silently lose the header.
const RESPONSE_HEADERS: &[(&str, &str)] = &[
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
         img-src 'self' data:; connect-src 'self'; frame-ancestors 'none'; \
         base-uri 'none'; object-src 'none'",
    ),
];

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    for (name, value) in RESPONSE_HEADERS {
        headers.insert(*name, HeaderValue::from_static(value));
    }
    resp
}

/// Rejects cross-origin POST/PUT/PATCH/DELETE requests. Reads are exempt.
pub async fn csrf_guard(req: Request, next: Next) -> Response {
    if mutates(req.method()) {
        if let Some(reason) = cross_origin_rejection(req.headers()) {
            return (StatusCode::FORBIDDEN, reason).into_response();
        }
    }
    next.run(req).await
}

fn mutates(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// `Some(reason)` when the request looks cross-origin. Decision order:
/// `Sec-Fetch-Site` (authoritative when a browser sends it), then `Origin`,
/// then `Referer`; absence of all three is allowed.
fn cross_origin_rejection(headers: &HeaderMap) -> Option<&'static str> {
    if let Some(site) = header_str(headers, "sec-fetch-site") {
        return site
            .eq_ignore_ascii_case("cross-site")
            .then_some("Forbidden: cross-site request");
    }

    for (name, reason) in [
        (header::ORIGIN.as_str(), "Forbidden: cross-origin request"),
        (header::REFERER.as_str(), "Forbidden: cross-origin referer"),
    ] {
        if let Some(value) = header_str(headers, name) {
            return (!points_at_loopback(value)).then_some(reason);
        }
    }

    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn points_at_loopback(url: &str) -> bool {
    url.contains("localhost") || url.contains("127.0.0.") || url.contains("[::1]")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut m = HeaderMap::new();
        for (k, v) in pairs {
            m.insert(
                header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        m
    }

    #[test]
    fn sec_fetch_site_cross_site_rejects() {
        assert!(cross_origin_rejection(&headers(&[("sec-fetch-site", "cross-site")])).is_some());
    }

    #[test]
    fn sec_fetch_site_same_origin_overrides_a_foreign_origin_header() {
        // Sec-Fetch-Site wins over the fallbacks when present.
        let h = headers(&[("sec-fetch-site", "same-origin"), ("origin", "https://evil.example")]);
        assert!(cross_origin_rejection(&h).is_none());
    }

    #[test]
    fn foreign_origin_rejects() {
        assert!(cross_origin_rejection(&headers(&[("origin", "https://evil.example")])).is_some());
    }

    #[test]
    fn loopback_origins_are_allowed() {
        for origin in ["http://localhost:4170", "http://127.0.0.1:4170", "http://[::1]:4170"] {
            assert!(cross_origin_rejection(&headers(&[("origin", origin)])).is_none(), "{origin}");
        }
    }

    #[test]
    fn foreign_referer_rejects_when_no_origin_is_present() {
        assert!(cross_origin_rejection(&headers(&[("referer", "https://evil.example/page")])).is_some());
    }

    #[test]
    fn bare_requests_without_browser_headers_pass() {
        assert!(cross_origin_rejection(&HeaderMap::new()).is_none());
    }

    #[test]
    fn only_mutating_methods_are_guarded() {
        assert!(mutates(&Method::POST));
        assert!(mutates(&Method::DELETE));
        assert!(!mutates(&Method::GET));
        assert!(!mutates(&Method::HEAD));
    }

    #[test]
    fn response_header_values_are_valid() {
        for (name, value) in RESPONSE_HEADERS {
            assert!(header::HeaderName::from_bytes(name.as_bytes()).is_ok(), "{name}");
            assert!(HeaderValue::from_str(value).is_ok(), "{name}");
        }
    }
}
