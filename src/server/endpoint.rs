// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Unix socket server for editor endpoints.
//!
//! Each connection is one editor endpoint. It sends newline-delimited
//! JSON-RPC notifications, which are handled strictly in order, and receives
//! `event:reconcile-state-changed` notifications for the working copies it
//! owns on the same socket.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::reconcile::ReconciliationEngine;
use super::tracker::ChangeTracker;
use crate::protocol::rpc::{self, NotificationMessage};
use crate::protocol::wire::RECONCILE_STATE_CHANGED;
use crate::session::{EventBroadcaster, EventKind};

/// Accepts editor endpoints and feeds their notifications to a
/// [`ChangeTracker`].
pub struct EndpointServer<E> {
    tracker: Arc<ChangeTracker<E>>,
    broadcaster: EventBroadcaster,
    next_endpoint: AtomicU64,
}

impl<E: ReconciliationEngine> EndpointServer<E> {
    /// Creates a new `EndpointServer`.
    pub const fn new(tracker: Arc<ChangeTracker<E>>, broadcaster: EventBroadcaster) -> Self {
        Self {
            tracker,
            broadcaster,
            next_endpoint: AtomicU64::new(1),
        }
    }

    /// Starts listening on the given Unix socket path.
    ///
    /// Spawns a background task that accepts connections. Returns a
    /// `JoinHandle` for the listener task.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn start(self, socket_path: &Path) -> Result<tokio::task::JoinHandle<()>> {
        // Remove stale socket file if it exists
        let _ = std::fs::remove_file(socket_path);

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            anyhow!(
                "Failed to bind endpoint socket {}: {e}",
                socket_path.display()
            )
        })?;

        info!("Endpoint socket listening on {}", socket_path.display());

        let server = Arc::new(self);

        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let server = server.clone();
                        tokio::spawn(async move { server.serve(stream).await });
                    }
                    Err(e) => warn!("Endpoint socket accept error: {e}"),
                }
            }
        }))
    }

    async fn serve(&self, stream: UnixStream) {
        let endpoint = format!("endpoint-{}", self.next_endpoint.fetch_add(1, Ordering::SeqCst));
        debug!("{} connected", endpoint);
        self.broadcaster.send(EventKind::EndpointConnected {
            endpoint: endpoint.clone(),
        });

        if let Err(e) = self.handle_connection(stream).await {
            debug!("{} connection error: {e}", endpoint);
        }

        debug!("{} disconnected", endpoint);
        self.broadcaster
            .send(EventKind::EndpointDisconnected { endpoint });
    }

    /// Reads notifications until the peer closes. Results flow back through
    /// a writer task so a slow reader never blocks delta application.
    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let writer_task = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                let line = match NotificationMessage::new(RECONCILE_STATE_CHANGED, result)
                    .and_then(|n| rpc::to_line(&n))
                {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode reconcile result: {e}");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!("Endpoint went away while writing: {e}");
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        let outcome = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            };

            match rpc::parse_line(&line) {
                Ok(Some(notification)) => self.tracker.handle(&notification, &tx).await,
                Ok(None) => {}
                Err(e) => {
                    warn!("Dropping malformed line: {e:#}");
                    self.broadcaster.send(EventKind::Rejected {
                        path: None,
                        error: "invalid_envelope".to_string(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        };

        // The writer finishes once queued reconcile passes release their senders
        drop(tx);
        drop(writer_task);
        outcome
    }
}
