// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod broker;
mod crypto;
mod error;
mod http;
mod routes;
mod server;
mod state;

pub use broker::{Broker, RunBroadcast};
pub use crypto::token::{RawToken, StoredToken, StoredTokenFile};
pub use error::ApiError;
pub use http::auth::{AsAuthState, AuthState, Identity, Session};
pub use server::{bind, router, serve};
pub use state::{AppState, CronRunResult, CronTaskRunner, UploadStore};
