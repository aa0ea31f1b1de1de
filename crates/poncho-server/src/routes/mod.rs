// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod approvals;
pub mod auth_routes;
pub mod conversations;
pub mod cron;
pub mod health;
pub mod uploads;
