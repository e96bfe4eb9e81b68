// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Dispatch of inbound editor notifications.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::reconcile::{ReconcileRequest, ReconciliationEngine, Reconciler, ResultSink};
use super::store::{ApplyOutcome, Snapshot, WorkingCopyStore};
use super::tracking::TrackingState;
use crate::error::{SyncError, SyncResult};
use crate::protocol::rpc::NotificationMessage;
use crate::protocol::wire::{EDITOR_CHANGES, FILE_OPERATION, PROJECT_REMOVED, RECONCILE};
use crate::protocol::{
    EditorChanges, FileOperation, FileOperationKind, ProjectRemoved, ReconcileParams,
};
use crate::session::{EventBroadcaster, EventKind};

/// Routes editor notifications to the store and schedules reconciliation.
pub struct ChangeTracker<E> {
    store: Arc<WorkingCopyStore>,
    reconciler: Reconciler<E>,
    broadcaster: EventBroadcaster,
}

impl<E: ReconciliationEngine> ChangeTracker<E> {
    /// Creates a tracker over `store`, reconciling with `engine`.
    pub fn new(store: Arc<WorkingCopyStore>, engine: Arc<E>, broadcaster: EventBroadcaster) -> Self {
        Self {
            store,
            reconciler: Reconciler::new(engine, broadcaster.clone()),
            broadcaster,
        }
    }

    /// The working-copy store.
    pub fn store(&self) -> &WorkingCopyStore {
        &self.store
    }

    /// The reconciliation engine.
    pub fn engine(&self) -> &Arc<E> {
        self.reconciler.engine()
    }

    /// Handles one notification. Failures are logged and recorded as
    /// rejections; they never propagate to the connection.
    pub async fn handle(&self, notification: &NotificationMessage, sink: &ResultSink) {
        let (path, result) = match notification.method.as_str() {
            EDITOR_CHANGES => match params::<EditorChanges>(notification) {
                Ok(changes) => (
                    Some(changes.file_location.clone()),
                    self.on_editor_changes(&changes, sink).await,
                ),
                Err(e) => (None, Err(e)),
            },
            FILE_OPERATION => match params::<FileOperation>(notification) {
                Ok(op) => (
                    Some(op.path.clone()),
                    self.on_file_operation(&op, sink).await,
                ),
                Err(e) => (None, Err(e)),
            },
            RECONCILE => match params::<ReconcileParams>(notification) {
                Ok(request) => (
                    Some(request.path.clone()),
                    self.on_reconcile(&request, sink).await,
                ),
                Err(e) => (None, Err(e)),
            },
            PROJECT_REMOVED => match params::<ProjectRemoved>(notification) {
                Ok(removed) => (
                    Some(removed.project_path.clone()),
                    self.on_project_removed(&removed).await,
                ),
                Err(e) => (None, Err(e)),
            },
            other => {
                debug!("Ignoring notification {}", other);
                return;
            }
        };

        if let Err(e) = result {
            warn!(
                "Rejected {} for {}: {}",
                notification.method,
                path.as_deref().unwrap_or("?"),
                e
            );
            self.broadcaster.send(EventKind::Rejected {
                path,
                error: e.kind().to_string(),
                reason: e.to_string(),
            });
        }
    }

    /// Applies one delta and reconciles every resulting content.
    ///
    /// # Errors
    ///
    /// Returns the decoding or application failure.
    pub async fn on_editor_changes(
        &self,
        changes: &EditorChanges,
        sink: &ResultSink,
    ) -> SyncResult<()> {
        match self.store.apply_delta(changes).await? {
            ApplyOutcome::Applied(applied) => {
                for (delta, snapshot) in applied {
                    self.broadcaster.send(EventKind::DeltaApplied {
                        path: snapshot.key.file_path.clone(),
                        kind: delta.kind.as_str().to_string(),
                        seq: delta.seq,
                        length: delta.content.len(),
                    });
                    self.submit(snapshot, sink)?;
                }
            }
            ApplyOutcome::Buffered { seq } => {
                debug!("Buffered seq {} for {}", seq, changes.file_location);
                self.broadcaster.send(EventKind::DeltaBuffered {
                    path: changes.file_location.clone(),
                    seq,
                });
            }
            ApplyOutcome::Skipped => {}
        }
        Ok(())
    }

    /// Applies a tracking lifecycle operation. A start reconciles the
    /// initial content, tagged with the file path as owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved, or a move carries no
    /// old path.
    pub async fn on_file_operation(&self, op: &FileOperation, sink: &ResultSink) -> SyncResult<()> {
        match op.kind {
            FileOperationKind::Start => {
                let snapshot = self.store.on_tracking_start(&op.path).await?;
                info!(
                    "Tracking {} ({} bytes)",
                    snapshot.key.file_path,
                    snapshot.content.len()
                );
                self.submit(snapshot, sink)?;
            }
            FileOperationKind::Stop => {
                self.store.on_tracking_stop(&op.path).await?;
                self.reconciler
                    .release(&self.store.registry().normalize(&op.path)?);
            }
            FileOperationKind::Suspend => self.store.on_tracking_suspend(&op.path).await?,
            FileOperationKind::Resume => self.store.on_tracking_resume(&op.path).await?,
            FileOperationKind::Move => {
                let old = op.old_path.as_deref().ok_or_else(|| {
                    SyncError::InvalidEnvelope(format!("move to {} without oldPath", op.path))
                })?;
                if self.store.on_tracking_move(old, &op.path).await?.is_some() {
                    self.reconciler
                        .release(&self.store.registry().normalize(old)?);
                }
            }
            FileOperationKind::Delete => {
                self.store.discard_file(&op.path).await?;
                self.reconciler
                    .release(&self.store.registry().normalize(&op.path)?);
            }
        }

        self.broadcaster.send(EventKind::Tracking {
            path: op.path.clone(),
            operation: op.kind.as_str().to_string(),
            old_path: op.old_path.clone(),
        });
        Ok(())
    }

    /// Discards every working copy of a removed project, together with its
    /// shadow directory, and releases the files from reconciliation.
    ///
    /// # Errors
    ///
    /// Returns an error if the project path cannot be resolved or its shadow
    /// directory cannot be removed.
    pub async fn on_project_removed(&self, removed: &ProjectRemoved) -> SyncResult<()> {
        let paths = self.store.discard_project(&removed.project_path).await?;
        for path in paths {
            self.reconciler.release(&path);
            self.broadcaster.send(EventKind::Tracking {
                path,
                operation: FileOperationKind::Delete.as_str().to_string(),
                old_path: None,
            });
        }
        Ok(())
    }

    /// Reconciles the current content of a working copy on request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownWorkingCopy`] when the file has none.
    pub async fn on_reconcile(&self, request: &ReconcileParams, sink: &ResultSink) -> SyncResult<()> {
        if self.store.tracking_state(&request.path).await == Some(TrackingState::Suspended) {
            debug!("Not reconciling suspended {}", request.path);
            return Ok(());
        }

        let mut snapshot = self.store.snapshot(&request.path).await?;
        if let Some(owner) = &request.working_copy_owner_id {
            snapshot.owner_id.clone_from(owner);
        }
        self.submit(snapshot, sink)
    }

    fn submit(&self, snapshot: Snapshot, sink: &ResultSink) -> SyncResult<()> {
        let real_path = self.store.registry().real_path(&snapshot.key.file_path)?;
        self.reconciler.submit(
            ReconcileRequest {
                project_path: snapshot.key.project_path,
                file_path: snapshot.key.file_path,
                real_path,
                content: snapshot.content,
            },
            snapshot.owner_id,
            sink.clone(),
        );
        Ok(())
    }
}

fn params<T: DeserializeOwned>(notification: &NotificationMessage) -> SyncResult<T> {
    serde_json::from_value(notification.params.clone()).map_err(|e| {
        SyncError::InvalidEnvelope(format!("bad {} params: {e}", notification.method))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NullEngine;
    use crate::protocol::{ChangeTarget, Delta, OffsetEncoding};
    use crate::server::project::ProjectRegistry;
    use crate::server::storage::WorkingCopyStorage;
    use crate::server::store::StoreSettings;
    use anyhow::{Result, anyhow};
    use std::fs;
    use tokio::sync::mpsc;

    fn tracker(root: &std::path::Path) -> ChangeTracker<NullEngine> {
        let registry = Arc::new(ProjectRegistry::new(root.to_path_buf()));
        let storage = WorkingCopyStorage::new(registry.clone(), ".tandem");
        let store = Arc::new(WorkingCopyStore::new(
            registry,
            storage,
            StoreSettings::default(),
        ));
        ChangeTracker::new(store, Arc::new(NullEngine), EventBroadcaster::noop())
    }

    fn notification<P: serde::Serialize>(method: &str, params: P) -> Result<NotificationMessage> {
        NotificationMessage::new(method, params)
    }

    fn operation(kind: FileOperationKind, path: &str, old: Option<&str>) -> FileOperation {
        FileOperation {
            kind,
            path: path.to_string(),
            old_path: old.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_method() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj"))?;
        fs::write(dir.path().join("proj/a.txt"), "hello")?;
        let tracker = tracker(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        tracker
            .handle(
                &notification(
                    FILE_OPERATION,
                    operation(FileOperationKind::Start, "/proj/a.txt", None),
                )?,
                &tx,
            )
            .await;

        let changes = EditorChanges::encode(
            &Delta::insert(5, "!"),
            &ChangeTarget {
                owner_id: "editor-7".to_string(),
                project_path: "/proj".to_string(),
                file_location: "/proj/a.txt".to_string(),
            },
            OffsetEncoding::Utf16,
            Some(1),
        );
        tracker.handle(&notification(EDITOR_CHANGES, changes)?, &tx).await;

        let started = rx.recv().await.ok_or_else(|| anyhow!("no start result"))?;
        assert_eq!(started.working_copy_owner_id, "/proj/a.txt");
        let result = rx.recv().await.ok_or_else(|| anyhow!("no reconcile result"))?;
        assert_eq!(result.working_copy_owner_id, "editor-7");
        assert_eq!(
            tracker.store().content("/proj/a.txt").await.as_deref(),
            Some("hello!")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_params_do_not_panic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tracker = tracker(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        tracker
            .handle(&notification(EDITOR_CHANGES, serde_json::json!({"type": 3}))?, &tx)
            .await;
        tracker
            .handle(&notification("unknown/method", serde_json::Value::Null)?, &tx)
            .await;
        assert!(tracker.store().is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_move_requires_old_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj"))?;
        let tracker = tracker(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = tracker
            .on_file_operation(&operation(FileOperationKind::Move, "/proj/b.txt", None), &tx)
            .await;
        assert!(matches!(err, Err(SyncError::InvalidEnvelope(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_discards_working_copy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj"))?;
        fs::write(dir.path().join("proj/a.txt"), "x")?;
        let tracker = tracker(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();
        let shadow = dir.path().join("proj/.tandem/workingCopies/proj.a.txt");

        tracker
            .on_file_operation(&operation(FileOperationKind::Start, "/proj/a.txt", None), &tx)
            .await?;
        assert!(shadow.exists());

        tracker
            .handle(
                &notification(
                    FILE_OPERATION,
                    serde_json::json!({"type": "DELETE", "path": "/proj/a.txt"}),
                )?,
                &tx,
            )
            .await;
        assert!(tracker.store().is_empty().await);
        assert_eq!(tracker.store().tracking_state("/proj/a.txt").await, None);
        assert!(!shadow.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_project_removed_discards_its_copies_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for project in ["proj", "other"] {
            fs::create_dir_all(dir.path().join(project))?;
            fs::write(dir.path().join(project).join("a.txt"), project)?;
        }
        let tracker = tracker(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        for path in ["/proj/a.txt", "/other/a.txt"] {
            tracker
                .on_file_operation(&operation(FileOperationKind::Start, path, None), &tx)
                .await?;
        }
        assert_eq!(tracker.store().len().await, 2);

        tracker
            .handle(
                &notification(
                    PROJECT_REMOVED,
                    ProjectRemoved {
                        project_path: "/proj".to_string(),
                    },
                )?,
                &tx,
            )
            .await;

        assert_eq!(tracker.store().len().await, 1);
        assert_eq!(tracker.store().content("/proj/a.txt").await, None);
        assert_eq!(
            tracker.store().content("/other/a.txt").await.as_deref(),
            Some("other")
        );
        assert!(!dir.path().join("proj/.tandem/workingCopies").exists());
        assert!(dir.path().join("other/.tandem/workingCopies/other.a.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_unknown_copy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj"))?;
        let tracker = tracker(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = tracker
            .on_reconcile(
                &ReconcileParams {
                    path: "/proj/none.txt".to_string(),
                    working_copy_owner_id: None,
                },
                &tx,
            )
            .await;
        assert!(matches!(err, Err(SyncError::UnknownWorkingCopy { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_on_demand_reconcile_uses_requested_owner() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj"))?;
        fs::write(dir.path().join("proj/a.txt"), "x")?;
        let tracker = tracker(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        tracker
            .on_file_operation(&operation(FileOperationKind::Start, "/proj/a.txt", None), &tx)
            .await?;
        let started = rx.recv().await.ok_or_else(|| anyhow!("no start result"))?;
        assert_eq!(started.working_copy_owner_id, "/proj/a.txt");

        tracker
            .on_reconcile(
                &ReconcileParams {
                    path: "/proj/a.txt".to_string(),
                    working_copy_owner_id: Some("tab-2".to_string()),
                },
                &tx,
            )
            .await?;

        let result = rx.recv().await.ok_or_else(|| anyhow!("no reconcile result"))?;
        assert_eq!(result.working_copy_owner_id, "tab-2");
        Ok(())
    }
}
