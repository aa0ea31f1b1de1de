// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// The `poncho` binary: starts the HTTP/SSE agent surface described by an
/// agent manifest.
#[derive(Parser, Debug)]
#[command(name = "poncho", version, about = "Agent execution core")]
pub struct Cli {
    /// Path to a `poncho.yaml`-style process config file.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (the default when no subcommand is given).
    Serve {
        /// Path to an AGENT.md-style manifest (YAML header + Mustache body).
        /// Falls back to a minimal built-in manifest when omitted.
        #[arg(long, short = 'm', env = "PONCHO_MANIFEST")]
        manifest: Option<PathBuf>,

        /// Overrides `server.bind_addr` / `PONCHO_BIND_ADDR`.
        #[arg(long, env = "PONCHO_BIND_ADDR")]
        bind: Option<String>,

        /// Overrides `store.backend` / `PONCHO_STORE_BACKEND` (`memory` | `local`).
        #[arg(long, env = "PONCHO_STORE_BACKEND")]
        store_backend: Option<String>,

        /// Overrides `store.root` / `PONCHO_STORE_ROOT`.
        #[arg(long, env = "PONCHO_STORE_ROOT")]
        store_root: Option<PathBuf>,
    },

    /// Print the merged configuration and exit.
    ShowConfig,
}
