// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! One-way delivery of encoded changes to the workspace endpoint.

use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::SyncError;
use crate::protocol::rpc::{self, NotificationMessage};
use crate::protocol::wire::{EDITOR_CHANGES, FILE_OPERATION};
use crate::protocol::{EditorChanges, FileOperation};

/// Fire-and-forget sink for encoded deltas.
///
/// Implementations never block on the remote side and never report
/// delivery failures to the caller.
pub trait ChangeTransmitter: Send {
    /// Sends one delta envelope.
    fn transmit(&self, changes: EditorChanges);
}

impl ChangeTransmitter for mpsc::UnboundedSender<EditorChanges> {
    fn transmit(&self, changes: EditorChanges) {
        if self.send(changes).is_err() {
            trace!("Change receiver dropped, discarding delta");
        }
    }
}

/// Writes notifications to a workspace endpoint's Unix socket.
///
/// Messages are queued onto a background writer task. The connection is
/// opened lazily and reopened after a failure; anything sent while the
/// endpoint is unreachable is dropped.
pub struct SocketTransmitter {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
}

impl SocketTransmitter {
    /// Starts the writer task for `socket_path`. Must run inside a Tokio
    /// runtime.
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(Self::writer_task(socket_path, rx));
        Self { tx, writer }
    }

    /// Queues a file tracking event.
    pub fn transmit_operation(&self, operation: &FileOperation) {
        self.enqueue(FILE_OPERATION, operation);
    }

    /// Flushes queued messages and closes the connection.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!("Transmitter writer task failed: {}", e);
        }
    }

    fn enqueue<P: Serialize>(&self, method: &str, params: P) {
        let line = match NotificationMessage::new(method, params).and_then(|m| rpc::to_line(&m)) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode {}: {:#}", method, e);
                return;
            }
        };
        if self.tx.send(line).is_err() {
            debug!("Transmitter closed, dropping {}", method);
        }
    }

    async fn writer_task(socket_path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
        let mut stream: Option<UnixStream> = None;

        while let Some(line) = rx.recv().await {
            if stream.is_none() {
                match UnixStream::connect(&socket_path).await {
                    Ok(s) => {
                        debug!("Connected to endpoint {}", socket_path.display());
                        stream = Some(s);
                    }
                    Err(e) => {
                        let err = SyncError::TransportUnavailable(format!(
                            "{}: {e}",
                            socket_path.display()
                        ));
                        debug!("Dropping message: {}", err);
                        continue;
                    }
                }
            }

            if let Some(s) = stream.as_mut()
                && let Err(e) = s.write_all(line.as_bytes()).await
            {
                debug!("Dropping message, endpoint write failed: {}", e);
                stream = None;
            }
        }

        if let Some(mut s) = stream
            && let Err(e) = s.shutdown().await
        {
            trace!("Endpoint shutdown failed: {}", e);
        }
    }
}

impl ChangeTransmitter for SocketTransmitter {
    fn transmit(&self, changes: EditorChanges) {
        self.enqueue(EDITOR_CHANGES, &changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChangeTarget, Delta, FileOperationKind, OffsetEncoding};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixListener;

    fn changes(text: &str) -> EditorChanges {
        EditorChanges::encode(
            &Delta::insert(0, text),
            &ChangeTarget {
                owner_id: "/p/a.txt".to_string(),
                project_path: "/p".to_string(),
                file_location: "/p/a.txt".to_string(),
            },
            OffsetEncoding::Utf16,
            Some(1),
        )
    }

    #[tokio::test]
    async fn test_socket_transmitter_writes_lines_in_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let socket = dir.path().join("sync.sock");
        let listener = UnixListener::bind(&socket)?;

        let transmitter = SocketTransmitter::new(socket);
        transmitter.transmit(changes("a"));
        transmitter.transmit_operation(&FileOperation {
            kind: FileOperationKind::Stop,
            path: "/p/a.txt".to_string(),
            old_path: None,
        });
        transmitter.close().await;

        let (stream, _) = listener.accept().await?;
        let mut lines = BufReader::new(stream).lines();

        let first = rpc::parse_line(&lines.next_line().await?.unwrap_or_default())?;
        assert_eq!(first.map(|m| m.method).as_deref(), Some(EDITOR_CHANGES));

        let second = rpc::parse_line(&lines.next_line().await?.unwrap_or_default())?;
        let second = second.ok_or_else(|| anyhow::anyhow!("missing second line"))?;
        assert_eq!(second.method, FILE_OPERATION);
        assert_eq!(second.params["type"], "STOP");

        assert!(lines.next_line().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_drops_silently() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let transmitter = SocketTransmitter::new(dir.path().join("missing.sock"));
        transmitter.transmit(changes("lost"));
        transmitter.close().await;
        Ok(())
    }

    #[test]
    fn test_channel_transmitter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.transmit(changes("x"));
        assert_eq!(rx.try_recv().ok().and_then(|c| c.text), Some("x".to_string()));
    }
}
