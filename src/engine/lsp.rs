// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Reconciliation through language servers.
//!
//! Each working copy is mirrored into its language server as an open
//! document. A reconcile pass sends the full text, waits for the matching
//! `publishDiagnostics`, then asks for semantic tokens.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use lsp_types::{
    DiagnosticSeverity, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, NumberOrString, PartialResultParams, SemanticTokensLegend,
    SemanticTokensParams, SemanticTokensResult, TextDocumentContentChangeEvent,
    TextDocumentIdentifier, TextDocumentItem, Uri, VersionedTextDocumentIdentifier,
    WorkDoneProgressParams,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::client::{LspClient, path_to_uri};
use super::manager::ClientManager;
use crate::protocol::{HighlightedPosition, LineIndex, OffsetEncoding};
use crate::server::reconcile::{
    Diagnostic, ReconcileOutcome, ReconcileRequest, ReconciliationEngine,
};

struct OpenDocument {
    language: String,
    uri: Uri,
    version: i32,
}

/// Language-server backed [`ReconciliationEngine`].
pub struct LspEngine {
    manager: ClientManager,
    wire_encoding: OffsetEncoding,
    timeout: Duration,
    documents: Mutex<HashMap<String, OpenDocument>>,
}

impl LspEngine {
    /// Creates an engine reporting offsets in `wire_encoding` and waiting at
    /// most `timeout` for diagnostics.
    #[must_use]
    pub fn new(manager: ClientManager, wire_encoding: OffsetEncoding, timeout: Duration) -> Self {
        Self {
            manager,
            wire_encoding,
            timeout,
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Shuts every language server down.
    pub async fn shutdown(&self) {
        self.manager.shutdown_all().await;
    }

    /// Sends the content as `didOpen` or full-text `didChange`. Returns the
    /// document version sent.
    async fn sync_document(
        &self,
        client: &LspClient,
        fresh: bool,
        request: &ReconcileRequest,
        language: &str,
        uri: &Uri,
    ) -> Result<i32> {
        let reopened = {
            let mut documents = self.documents.lock().await;
            if fresh {
                // A restarted server has none of our documents
                documents.retain(|_, d| d.language != language);
            }
            match documents.get_mut(&request.file_path) {
                Some(doc) => {
                    doc.version += 1;
                    Some(doc.version)
                }
                None => {
                    documents.insert(
                        request.file_path.clone(),
                        OpenDocument {
                            language: language.to_string(),
                            uri: uri.clone(),
                            version: 1,
                        },
                    );
                    None
                }
            }
        };

        if let Some(version) = reopened {
            client
                .did_change(DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier {
                        uri: uri.clone(),
                        version,
                    },
                    content_changes: vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: request.content.clone(),
                    }],
                })
                .await?;
            Ok(version)
        } else {
            client
                .did_open(DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri: uri.clone(),
                        language_id: language.to_string(),
                        version: 1,
                        text: request.content.clone(),
                    },
                })
                .await?;
            Ok(1)
        }
    }

    async fn highlights(
        &self,
        client: &LspClient,
        uri: &Uri,
        content: &str,
    ) -> Vec<HighlightedPosition> {
        let Some(legend) = client.semantic_legend() else {
            return Vec::new();
        };

        let params = SemanticTokensParams {
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            text_document: TextDocumentIdentifier { uri: uri.clone() },
        };

        match client.semantic_tokens_full(params).await {
            Ok(Some(SemanticTokensResult::Tokens(tokens))) => decode_semantic_tokens(
                &tokens.data,
                legend,
                content,
                client.encoding(),
                self.wire_encoding,
            ),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("Semantic tokens for {} failed: {}", uri.as_str(), e);
                Vec::new()
            }
        }
    }
}

impl ReconciliationEngine for LspEngine {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileOutcome> {
        let Some(language) = detect_language_id(&request.real_path) else {
            return Ok(ReconcileOutcome::default());
        };
        if !self.manager.has_server(language) {
            debug!("No server for {} ({})", request.file_path, language);
            return Ok(ReconcileOutcome::default());
        }

        let (client, fresh) = self.manager.get_client(language).await?;
        let uri = path_to_uri(&request.real_path)?;

        let after = client.diagnostics_generation(&uri).await;
        let version = self
            .sync_document(&client, fresh, request, language, &uri)
            .await?;

        let lsp_diagnostics = match client
            .wait_for_diagnostics(&uri, version, after, self.timeout)
            .await
        {
            Some(diagnostics) => diagnostics,
            None if !client.is_alive() => {
                return Err(anyhow!("{language} server died while reconciling"));
            }
            None => {
                warn!(
                    "No diagnostics for {} v{} within {:?}, using last published",
                    request.file_path, version, self.timeout
                );
                client.get_diagnostics(&uri).await
            }
        };

        let index = LineIndex::new(&request.content);
        let diagnostics = lsp_diagnostics
            .iter()
            .map(|d| convert_diagnostic(d, &index, client.encoding(), self.wire_encoding))
            .collect();

        let highlights = self.highlights(&client, &uri, &request.content).await;

        Ok(ReconcileOutcome {
            diagnostics,
            highlights,
        })
    }

    async fn release(&self, file_path: &str) {
        let Some(doc) = self.documents.lock().await.remove(file_path) else {
            return;
        };
        let Some(client) = self.manager.active_client(&doc.language).await else {
            return;
        };
        client.forget(&doc.uri).await;
        if let Err(e) = client
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: doc.uri },
            })
            .await
        {
            warn!("didClose for {} failed: {}", file_path, e);
        }
    }
}

/// LSP language id for a file, by extension.
#[must_use]
pub fn detect_language_id(path: &Path) -> Option<&'static str> {
    let language = match path.extension().and_then(|e| e.to_str())? {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "jsx" => "javascriptreact",
        "c" => "c",
        "cpp" | "cc" | "cxx" | "h" | "hpp" => "cpp",
        "java" => "java",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" => "shellscript",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" => "markdown",
        "html" => "html",
        "css" => "css",
        "lua" => "lua",
        _ => return None,
    };
    Some(language)
}

fn convert_diagnostic(
    d: &lsp_types::Diagnostic,
    index: &LineIndex<'_>,
    server: OffsetEncoding,
    wire: OffsetEncoding,
) -> Diagnostic {
    let start = index.byte_of_position(d.range.start.line, d.range.start.character, server);
    let end = index
        .byte_of_position(d.range.end.line, d.range.end.character, server)
        .max(start);

    Diagnostic {
        message: d.message.clone(),
        // Missing severity is treated as an error
        is_error: matches!(d.severity, None | Some(DiagnosticSeverity::ERROR)),
        is_warning: d.severity == Some(DiagnosticSeverity::WARNING),
        start_offset: index.offset_of_byte(start, wire),
        end_offset: index.offset_of_byte(end, wire),
        line_number: index.line_of_byte(start) + 1,
        code: d.code.as_ref().map(|c| match c {
            NumberOrString::Number(n) => n.to_string(),
            NumberOrString::String(s) => s.clone(),
        }),
    }
}

/// Decodes relative semantic tokens into absolute highlighted ranges.
#[must_use]
pub fn decode_semantic_tokens(
    data: &[lsp_types::SemanticToken],
    legend: &SemanticTokensLegend,
    content: &str,
    server: OffsetEncoding,
    wire: OffsetEncoding,
) -> Vec<HighlightedPosition> {
    let index = LineIndex::new(content);
    let mut line = 0u32;
    let mut start = 0u32;

    data.iter()
        .map(|token| {
            if token.delta_line > 0 {
                line = line.saturating_add(token.delta_line);
                start = token.delta_start;
            } else {
                start = start.saturating_add(token.delta_start);
            }

            let from = index.byte_of_position(line, start, server);
            let to = index.byte_of_position(line, start.saturating_add(token.length), server);
            let offset = index.offset_of_byte(from, wire);

            HighlightedPosition {
                offset,
                length: index.offset_of_byte(to, wire).saturating_sub(offset),
                kind: legend
                    .token_types
                    .get(token.token_type as usize)
                    .map_or_else(|| "unknown".to_string(), |t| t.as_str().to_string()),
            }
        })
        .collect()
}
