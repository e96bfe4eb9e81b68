// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Reconciliation engines.

/// Low-level LSP client for communicating with a server process.
pub mod client;
/// Lazy spawning and restarting of language servers.
pub mod manager;
/// Language-server backed engine.
pub mod lsp;
/// Server lifecycle state.
pub mod state;

pub use client::LspClient;
pub use lsp::{LspEngine, detect_language_id};
pub use manager::ClientManager;
pub use state::ServerState;

use anyhow::Result;

use crate::server::reconcile::{ReconcileOutcome, ReconcileRequest, ReconciliationEngine};

/// Engine that finds nothing. Used when no language server is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEngine;

impl ReconciliationEngine for NullEngine {
    async fn reconcile(&self, _request: &ReconcileRequest) -> Result<ReconcileOutcome> {
        Ok(ReconcileOutcome::default())
    }

    async fn release(&self, _file_path: &str) {}
}

/// The engine selected by configuration.
pub enum ConfiguredEngine {
    /// Language servers from `[server.<lang>]`.
    Lsp(LspEngine),
    /// No servers configured.
    Null(NullEngine),
}

impl ConfiguredEngine {
    /// Shuts down any language servers.
    pub async fn shutdown(&self) {
        if let Self::Lsp(engine) = self {
            engine.shutdown().await;
        }
    }
}

impl ReconciliationEngine for ConfiguredEngine {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileOutcome> {
        match self {
            Self::Lsp(engine) => engine.reconcile(request).await,
            Self::Null(engine) => engine.reconcile(request).await,
        }
    }

    async fn release(&self, file_path: &str) {
        match self {
            Self::Lsp(engine) => engine.release(file_path).await,
            Self::Null(engine) => engine.release(file_path).await,
        }
    }
}
