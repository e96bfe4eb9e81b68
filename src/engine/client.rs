/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result, anyhow};
use bytes::BytesMut;
use lsp_types::{
    ClientCapabilities, Diagnostic, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, GeneralClientCapabilities, InitializeParams, InitializeResult,
    InitializedParams, PositionEncodingKind, ProgressParams, PublishDiagnosticsClientCapabilities,
    PublishDiagnosticsParams, SemanticTokensClientCapabilities,
    SemanticTokensClientCapabilitiesRequests, SemanticTokensFullOptions, SemanticTokensLegend,
    SemanticTokensParams, SemanticTokensResult, SemanticTokensServerCapabilities,
    TextDocumentClientCapabilities, TokenFormat, Uri, WorkspaceFolder,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, error, trace, warn};

use super::state::{ProgressTracker, ServerState, SharedState};
use crate::protocol::OffsetEncoding;
use crate::protocol::rpc::{
    self, NotificationMessage, RequestId, RequestMessage, ResponseError, ResponseMessage,
};
use crate::session::EventBroadcaster;

/// Default timeout for LSP requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Latest `publishDiagnostics` for one document.
#[derive(Debug, Clone, Default)]
pub struct PublishedDiagnostics {
    /// Document version the server reported, if any.
    pub version: Option<i32>,
    /// Bumped on every publish for this document.
    pub generation: u64,
    /// The diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

type DiagnosticsCache = Arc<Mutex<HashMap<Uri, PublishedDiagnostics>>>;
type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;

struct Inbound {
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingRequests,
    diagnostics: DiagnosticsCache,
    published: Arc<Notify>,
    state: SharedState,
}

/// Manages communication with an LSP server process.
pub struct LspClient {
    language: String,
    next_id: AtomicI64,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingRequests,
    diagnostics: DiagnosticsCache,
    published: Arc<Notify>,
    state: SharedState,
    encoding: OffsetEncoding,
    semantic_legend: Option<SemanticTokensLegend>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _child: Child,
}

impl LspClient {
    /// Spawns the LSP server process and starts the response reader task.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    pub fn spawn(
        program: &str,
        args: &[String],
        language: &str,
        broadcaster: EventBroadcaster,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn LSP server: {program}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin of {program} not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout of {program} not captured"))?;

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: DiagnosticsCache = Arc::new(Mutex::new(HashMap::new()));
        let published = Arc::new(Notify::new());
        let state = SharedState::new(language, broadcaster);

        let reader_handle = tokio::spawn(Self::reader_task(
            stdout,
            Inbound {
                stdin: stdin.clone(),
                pending: pending.clone(),
                diagnostics: diagnostics.clone(),
                published: published.clone(),
                state: state.clone(),
            },
        ));

        Ok(Self {
            language: language.to_string(),
            next_id: AtomicI64::new(1),
            stdin,
            pending,
            diagnostics,
            published,
            state,
            encoding: OffsetEncoding::Utf16,
            semantic_legend: None,
            _reader_handle: reader_handle,
            _child: child,
        })
    }

    /// Background task that reads LSP messages and routes them.
    async fn reader_task(stdout: ChildStdout, inbound: Inbound) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = BytesMut::with_capacity(8192);
        let mut progress = ProgressTracker::default();

        loop {
            let mut temp = [0u8; 4096];
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!("LSP stdout closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(e) => {
                    error!("Error reading from LSP stdout: {}", e);
                    break;
                }
            }

            while let Ok(Some(message)) = rpc::try_parse_message(&mut buffer) {
                trace!("Received LSP message: {}", message);

                let value: serde_json::Value = match serde_json::from_str(&message) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Failed to parse JSON: {}", e);
                        continue;
                    }
                };

                match (value.get("method").and_then(|m| m.as_str()), value.get("id")) {
                    (Some(method), Some(id)) => {
                        let method = method.to_string();
                        let id = serde_json::from_value(id.clone()).unwrap_or(RequestId::Number(0));
                        Self::answer_server_request(&inbound.stdin, &method, id).await;
                    }
                    (Some(_), None) => {
                        if let Ok(notification) =
                            serde_json::from_value::<NotificationMessage>(value)
                        {
                            Self::handle_notification(&notification, &inbound, &mut progress)
                                .await;
                        }
                    }
                    (None, Some(_)) => {
                        if let Ok(response) = serde_json::from_value::<ResponseMessage>(value)
                            && let Some(id) = &response.id
                        {
                            if let Some(sender) = inbound.pending.lock().await.remove(id) {
                                let _ = sender.send(response);
                            } else {
                                warn!("Received response for unknown request id: {:?}", id);
                            }
                        }
                    }
                    (None, None) => warn!("Unknown message format: {}", message),
                }
            }
        }

        inbound.state.set(ServerState::Dead);
        // Wake anyone waiting for diagnostics so they see the server is gone
        inbound.published.notify_waiters();
        warn!("LSP reader task exiting - server connection lost");
    }

    /// Replies to server-initiated requests. Progress tokens and dynamic
    /// registration are acknowledged, everything else is refused.
    async fn answer_server_request(stdin: &Arc<Mutex<ChildStdin>>, method: &str, id: RequestId) {
        debug!("Received server request: {} (id: {:?})", method, id);

        let (result, error) = match method {
            "window/workDoneProgress/create" | "client/registerCapability" => {
                (Some(serde_json::Value::Null), None)
            }
            "workspace/configuration" => (Some(serde_json::json!([])), None),
            _ => (
                None,
                Some(ResponseError {
                    code: -32601,
                    message: format!("Method '{method}' not supported by client"),
                    data: None,
                }),
            ),
        };

        let response = ResponseMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result,
            error,
        };

        if let Err(e) = write_framed(stdin, &response).await {
            warn!("Failed to answer {}: {}", method, e);
        }
    }

    async fn handle_notification(
        notification: &NotificationMessage,
        inbound: &Inbound,
        progress: &mut ProgressTracker,
    ) {
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                let Ok(params) =
                    serde_json::from_value::<PublishDiagnosticsParams>(notification.params.clone())
                else {
                    warn!("Failed to parse publishDiagnostics params");
                    return;
                };
                debug!(
                    "Received {} diagnostics for {} (version {:?})",
                    params.diagnostics.len(),
                    params.uri.as_str(),
                    params.version
                );
                {
                    let mut cache = inbound.diagnostics.lock().await;
                    let entry = cache.entry(params.uri).or_default();
                    entry.version = params.version;
                    entry.generation += 1;
                    entry.diagnostics = params.diagnostics;
                }
                inbound.published.notify_waiters();
            }
            "$/progress" => {
                if let Ok(params) =
                    serde_json::from_value::<ProgressParams>(notification.params.clone())
                {
                    let next = if progress.update(&params) {
                        ServerState::Indexing
                    } else {
                        ServerState::Ready
                    };
                    if inbound.state.get() != ServerState::Initializing {
                        inbound.state.set(next);
                    }
                }
            }
            "window/logMessage" | "window/showMessage" => {
                if let Some(message) = notification.params.get("message").and_then(|m| m.as_str()) {
                    debug!("LSP server message: {}", message);
                }
            }
            _ => trace!("Ignoring notification: {}", notification.method),
        }
    }

    /// Sends a request and waits for the response with timeout.
    async fn request<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));

        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        write_framed(&self.stdin, &request).await?;

        let response = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(anyhow!("LSP server closed connection")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(anyhow!(
                    "LSP request '{method}' timed out after {REQUEST_TIMEOUT:?}"
                ));
            }
        };

        if let Some(error) = response.error {
            return Err(anyhow!("LSP error {}: {}", error.code, error.message));
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).context("Failed to parse LSP response")
    }

    /// Sends a notification (no response expected).
    async fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        let notification = NotificationMessage::new(method, params)?;
        write_framed(&self.stdin, &notification).await
    }

    /// Performs the LSP initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn initialize(
        &mut self,
        root: &Path,
        initialization_options: Option<serde_json::Value>,
    ) -> Result<InitializeResult> {
        let root_uri = path_to_uri(root)?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            initialization_options,
            capabilities: ClientCapabilities {
                general: Some(GeneralClientCapabilities {
                    position_encodings: Some(vec![
                        PositionEncodingKind::UTF8,
                        PositionEncodingKind::UTF16,
                        PositionEncodingKind::UTF32,
                    ]),
                    ..Default::default()
                }),
                text_document: Some(TextDocumentClientCapabilities {
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                        version_support: Some(true),
                        ..Default::default()
                    }),
                    semantic_tokens: Some(SemanticTokensClientCapabilities {
                        requests: SemanticTokensClientCapabilitiesRequests {
                            range: Some(false),
                            full: Some(SemanticTokensFullOptions::Bool(true)),
                        },
                        formats: vec![TokenFormat::RELATIVE],
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root
                    .file_name()
                    .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", params).await?;

        self.encoding = result
            .capabilities
            .position_encoding
            .as_ref()
            .map_or(OffsetEncoding::Utf16, encoding_of);
        debug!("[{}] position encoding: {}", self.language, self.encoding.as_str());

        self.semantic_legend = match &result.capabilities.semantic_tokens_provider {
            Some(SemanticTokensServerCapabilities::SemanticTokensOptions(options))
                if options.full.is_some() =>
            {
                Some(options.legend.clone())
            }
            Some(SemanticTokensServerCapabilities::SemanticTokensRegistrationOptions(options))
                if options.semantic_tokens_options.full.is_some() =>
            {
                Some(options.semantic_tokens_options.legend.clone())
            }
            _ => None,
        };

        self.notify("initialized", InitializedParams {}).await?;
        self.state.set(ServerState::Ready);

        Ok(result)
    }

    /// Language this server handles.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Negotiated position encoding.
    #[must_use]
    pub const fn encoding(&self) -> OffsetEncoding {
        self.encoding
    }

    /// Semantic token legend, when the server supports full-document tokens.
    #[must_use]
    pub const fn semantic_legend(&self) -> Option<&SemanticTokensLegend> {
        self.semantic_legend.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Sends shutdown request and exit notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not acknowledge.
    pub async fn shutdown(&mut self) -> Result<()> {
        let _: serde_json::Value = self.request("shutdown", serde_json::Value::Null).await?;
        self.notify("exit", serde_json::Value::Null).await?;
        Ok(())
    }

    /// Notifies the LSP server that a document was opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub async fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<()> {
        self.notify("textDocument/didOpen", params).await
    }

    /// Notifies the LSP server that a document changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub async fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<()> {
        self.notify("textDocument/didChange", params).await
    }

    /// Notifies the LSP server that a document was closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub async fn did_close(&self, params: DidCloseTextDocumentParams) -> Result<()> {
        self.notify("textDocument/didClose", params).await
    }

    /// Requests semantic tokens for a whole document.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or times out.
    pub async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        self.request("textDocument/semanticTokens/full", params)
            .await
    }

    /// Publish generation of `uri`, to compare against after a change.
    pub async fn diagnostics_generation(&self, uri: &Uri) -> u64 {
        self.diagnostics
            .lock()
            .await
            .get(uri)
            .map_or(0, |p| p.generation)
    }

    /// Waits for diagnostics that cover `version` of `uri`.
    ///
    /// Servers that report versions must report `version` or newer; servers
    /// that don't must publish after generation `after`. Returns `None` on
    /// timeout or when the server dies.
    pub async fn wait_for_diagnostics(
        &self,
        uri: &Uri,
        version: i32,
        after: u64,
        timeout: Duration,
    ) -> Option<Vec<Diagnostic>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so a publish in between is not missed
            let notified = self.published.notified();

            if let Some(published) = self.diagnostics.lock().await.get(uri)
                && published
                    .version
                    .map_or(published.generation > after, |v| v >= version)
            {
                return Some(published.diagnostics.clone());
            }

            if !self.is_alive() {
                return None;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Gets cached diagnostics for a specific URI.
    pub async fn get_diagnostics(&self, uri: &Uri) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .await
            .get(uri)
            .map(|p| p.diagnostics.clone())
            .unwrap_or_default()
    }

    /// Drops cached diagnostics for a closed document.
    pub async fn forget(&self, uri: &Uri) {
        self.diagnostics.lock().await.remove(uri);
    }

    /// Returns true if the LSP server connection is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.get() != ServerState::Dead
    }
}

async fn write_framed<T: serde::Serialize>(
    stdin: &Arc<Mutex<ChildStdin>>,
    message: &T,
) -> Result<()> {
    let body = serde_json::to_string(message)?;
    trace!("Sending LSP message: {}", body);

    let mut stdin = stdin.lock().await;
    stdin
        .write_all(rpc::frame_content_length(&body).as_bytes())
        .await?;
    stdin.flush().await?;
    Ok(())
}

/// Maps a negotiated position encoding onto an offset encoding.
#[must_use]
pub fn encoding_of(kind: &PositionEncodingKind) -> OffsetEncoding {
    match kind.as_str() {
        "utf-8" => OffsetEncoding::Utf8,
        "utf-32" => OffsetEncoding::Utf32,
        _ => OffsetEncoding::Utf16,
    }
}

/// `file://` URI of a filesystem path.
///
/// # Errors
///
/// Returns an error if the path is not absolute.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| anyhow!("Not an absolute path: {}", path.display()))?;
    url.as_str()
        .parse()
        .map_err(|e| anyhow!("Invalid URI for {}: {e:?}", path.display()))
}
