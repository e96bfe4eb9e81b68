// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The working-copy store: one shadow per tracked file.
//!
//! The map lock only guards lookup and insertion. Each working copy has its
//! own lock, held while a delta is applied and persisted, so edits to one
//! file are serialized while different files proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::project::ProjectRegistry;
use super::storage::WorkingCopyStorage;
use super::tracking::{TrackingState, TrackingTable};
use super::working_copy::{AppliedDelta, WorkingCopy, WorkingCopyKey, sha256_hex};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{EditorChanges, OffsetEncoding};

/// Store behavior knobs.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Unit for wire offsets.
    pub encoding: OffsetEncoding,
    /// Compare an existing shadow with the real file on tracking start.
    pub verify_on_start: bool,
    /// Write every change through to the on-disk shadow.
    pub persist: bool,
    /// Deltas that may wait for a missing predecessor, per file.
    pub max_pending: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            encoding: OffsetEncoding::default(),
            verify_on_start: true,
            persist: true,
            max_pending: 64,
        }
    }
}

/// Content of a working copy at one point in time, handed to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Identity of the working copy.
    pub key: WorkingCopyKey,
    /// Owner to address the reconcile result to.
    pub owner_id: String,
    /// Full content.
    pub content: String,
}

/// What happened to an incoming delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Deltas reached the content; one snapshot per applied delta.
    Applied(Vec<(AppliedDelta, Snapshot)>),
    /// Held until its predecessor arrives.
    Buffered {
        /// Sequence number of the held delta.
        seq: u64,
    },
    /// Tracking is suspended (or the copy was discarded mid-flight).
    Skipped,
}

type SharedCopy = Arc<Mutex<WorkingCopy>>;

/// All working copies of a workspace.
pub struct WorkingCopyStore {
    registry: Arc<ProjectRegistry>,
    storage: WorkingCopyStorage,
    settings: StoreSettings,
    copies: Mutex<HashMap<WorkingCopyKey, SharedCopy>>,
    tracking: Mutex<TrackingTable>,
}

impl WorkingCopyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(
        registry: Arc<ProjectRegistry>,
        storage: WorkingCopyStorage,
        settings: StoreSettings,
    ) -> Self {
        Self {
            registry,
            storage,
            settings,
            copies: Mutex::new(HashMap::new()),
            tracking: Mutex::new(TrackingTable::default()),
        }
    }

    /// The registry paths are resolved against.
    #[must_use]
    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Starts tracking `path`, creating its working copy from the real file
    /// or reusing an existing one.
    ///
    /// With `verify_on_start`, a reused copy whose content hash differs from
    /// the real file is recreated from the real file. A reused copy always
    /// drops its sequence baseline, since the editor starts counting anew.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be resolved or the file cannot
    /// be read.
    pub async fn on_tracking_start(&self, path: &str) -> SyncResult<Snapshot> {
        let key = self.key_for(path)?;
        self.tracking.lock().await.start(&key.file_path);

        let copy = self.get_or_create(&key).await?;
        let mut wc = copy.lock().await;

        if self.settings.verify_on_start
            && let Some(real) = self.storage.read_real(&key.file_path).await?
            && sha256_hex(&real) != wc.content_hash()
        {
            warn!(
                "Working copy of {} diverged from the real file, recreating",
                key.file_path
            );
            wc.reset(real);
            self.persist(&wc).await;
        }
        wc.reset_sequence();

        Ok(snapshot(&wc))
    }

    /// Stops tracking and deletes the working copy. Silent when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved.
    pub async fn on_tracking_stop(&self, path: &str) -> SyncResult<()> {
        let key = self.key_for(path)?;
        self.tracking.lock().await.stop(&key.file_path);
        self.discard(&key).await;
        Ok(())
    }

    /// Suspends delta application for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub async fn on_tracking_suspend(&self, path: &str) -> SyncResult<()> {
        let path = self.registry.normalize(path)?;
        if !self.tracking.lock().await.suspend(&path) {
            debug!("Suspend for untracked {}", path);
        }
        Ok(())
    }

    /// Resumes delta application for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub async fn on_tracking_resume(&self, path: &str) -> SyncResult<()> {
        let path = self.registry.normalize(path)?;
        if !self.tracking.lock().await.resume(&path) {
            debug!("Resume for untracked {}", path);
        }
        Ok(())
    }

    /// Renames the working copy of `old` to `new`, keeping its content.
    /// No-op when `old` has none. Returns the snapshot under the new key.
    ///
    /// # Errors
    ///
    /// Returns an error if either path cannot be resolved.
    pub async fn on_tracking_move(&self, old: &str, new: &str) -> SyncResult<Option<Snapshot>> {
        let old_key = self.key_for(old)?;
        let new_key = self.key_for(new)?;

        self.tracking
            .lock()
            .await
            .rename(&old_key.file_path, &new_key.file_path);

        let copy = {
            let mut copies = self.copies.lock().await;
            let Some(copy) = copies.remove(&old_key) else {
                debug!("Move of {} without working copy", old_key.file_path);
                return Ok(None);
            };
            copies.insert(new_key.clone(), copy.clone());
            copy
        };

        let mut wc = copy.lock().await;
        wc.rekey(new_key.clone());
        if self.settings.persist
            && let Err(e) = self
                .storage
                .rename_shadow(
                    &old_key.project_path,
                    &old_key.file_path,
                    &new_key.project_path,
                    &new_key.file_path,
                )
                .await
        {
            warn!("Failed to rename shadow of {}: {}", old_key.file_path, e);
        }
        info!("Moved working copy {} -> {}", old_key.file_path, new_key.file_path);
        Ok(Some(snapshot(&wc)))
    }

    /// Decodes and applies one envelope.
    ///
    /// The working copy is created lazily from the real file. Nothing is
    /// applied while the file's tracking is suspended.
    ///
    /// # Errors
    ///
    /// Returns the decode, addressing or application failure, including
    /// [`SyncError::ProjectResolution`] when the envelope names a project
    /// other than the one owning the file. The working copy is unchanged on
    /// error.
    pub async fn apply_delta(&self, changes: &EditorChanges) -> SyncResult<ApplyOutcome> {
        let delta = changes.decode()?;
        let key = self.key_for(&changes.file_location)?;
        if self.registry.normalize(&changes.project_path)? != key.project_path {
            warn!(
                "{} addressed to project {}, but it belongs to {}",
                key.file_path, changes.project_path, key.project_path
            );
            return Err(SyncError::ProjectResolution {
                path: key.file_path,
            });
        }

        if !self.tracking.lock().await.accepts_deltas(&key.file_path) {
            debug!("Ignoring {} for suspended {}", delta.kind().as_str(), key.file_path);
            return Ok(ApplyOutcome::Skipped);
        }

        let copy = self.get_or_create(&key).await?;
        let mut wc = copy.lock().await;
        if wc.is_discarded() {
            return Ok(ApplyOutcome::Skipped);
        }

        let applied = wc.apply(
            &delta,
            changes.seq,
            self.settings.encoding,
            self.settings.max_pending,
        )?;

        if applied.is_empty() {
            return Ok(ApplyOutcome::Buffered {
                seq: changes.seq.unwrap_or_default(),
            });
        }

        self.persist(&wc).await;

        let owner_id = if changes.working_copy_owner_id.is_empty() {
            key.file_path.clone()
        } else {
            changes.working_copy_owner_id.clone()
        };

        Ok(ApplyOutcome::Applied(
            applied
                .into_iter()
                .map(|a| {
                    let snapshot = Snapshot {
                        key: key.clone(),
                        owner_id: owner_id.clone(),
                        content: a.content.clone(),
                    };
                    (a, snapshot)
                })
                .collect(),
        ))
    }

    /// Current content of the working copy of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownWorkingCopy`] when there is none.
    pub async fn snapshot(&self, path: &str) -> SyncResult<Snapshot> {
        let key = self.key_for(path)?;
        let copy = self
            .copies
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::UnknownWorkingCopy {
                path: key.file_path.clone(),
            })?;
        let wc = copy.lock().await;
        Ok(snapshot(&wc))
    }

    /// Drops one working copy regardless of tracking state. Returns whether
    /// one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved.
    pub async fn discard_file(&self, path: &str) -> SyncResult<bool> {
        let key = self.key_for(path)?;
        self.tracking.lock().await.stop(&key.file_path);
        Ok(self.discard(&key).await)
    }

    /// Drops every working copy and session of a project and deletes its
    /// shadow directory. Returns the discarded file paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the shadow directory cannot be removed.
    pub async fn discard_project(&self, project: &str) -> SyncResult<Vec<String>> {
        let project = self.registry.normalize(project)?;

        let removed: Vec<SharedCopy> = {
            let mut copies = self.copies.lock().await;
            let keys: Vec<WorkingCopyKey> = copies
                .keys()
                .filter(|k| k.project_path == project)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| copies.remove(k)).collect()
        };

        self.tracking.lock().await.remove_under(&project);

        let mut paths = Vec::with_capacity(removed.len());
        for copy in removed {
            let mut wc = copy.lock().await;
            wc.mark_discarded();
            paths.push(wc.key().file_path.clone());
        }

        self.storage.remove_project(&project).await?;
        paths.sort();
        info!("Discarded {} working copies of {}", paths.len(), project);
        Ok(paths)
    }

    /// Tracking state of `path`.
    pub async fn tracking_state(&self, path: &str) -> Option<TrackingState> {
        let path = self.registry.normalize(path).ok()?;
        self.tracking.lock().await.state(&path)
    }

    /// Current content of `path`, if it has a working copy.
    pub async fn content(&self, path: &str) -> Option<String> {
        self.snapshot(path).await.ok().map(|s| s.content)
    }

    /// Number of live working copies.
    pub async fn len(&self) -> usize {
        self.copies.lock().await.len()
    }

    /// Whether there are no working copies.
    pub async fn is_empty(&self) -> bool {
        self.copies.lock().await.is_empty()
    }

    fn key_for(&self, path: &str) -> SyncResult<WorkingCopyKey> {
        let file_path = self.registry.normalize(path)?;
        self.registry.real_path(&file_path)?;
        let project_path = self.registry.resolve_project(&file_path)?;
        Ok(WorkingCopyKey {
            project_path,
            file_path,
        })
    }

    async fn get_or_create(&self, key: &WorkingCopyKey) -> SyncResult<SharedCopy> {
        let mut copies = self.copies.lock().await;
        if let Some(copy) = copies.get(key) {
            return Ok(copy.clone());
        }

        let persisted = if self.settings.persist {
            self.storage
                .read_shadow(&key.project_path, &key.file_path)
                .await?
        } else {
            None
        };

        let content = match persisted {
            Some(content) => {
                debug!("Loaded persisted working copy of {}", key.file_path);
                content
            }
            None => {
                let content = self
                    .storage
                    .read_real(&key.file_path)
                    .await?
                    .unwrap_or_default();
                if self.settings.persist
                    && let Err(e) = self
                        .storage
                        .write_shadow(&key.project_path, &key.file_path, &content)
                        .await
                {
                    warn!("Failed to persist working copy of {}: {}", key.file_path, e);
                }
                debug!("Created working copy of {}", key.file_path);
                content
            }
        };

        let copy = Arc::new(Mutex::new(WorkingCopy::new(key.clone(), content)));
        copies.insert(key.clone(), copy.clone());
        drop(copies);
        Ok(copy)
    }

    async fn discard(&self, key: &WorkingCopyKey) -> bool {
        let Some(copy) = self.copies.lock().await.remove(key) else {
            debug!("No working copy to discard for {}", key.file_path);
            return false;
        };

        let mut wc = copy.lock().await;
        wc.mark_discarded();
        if self.settings.persist
            && let Err(e) = self
                .storage
                .remove_shadow(&key.project_path, &key.file_path)
                .await
        {
            warn!("Failed to remove shadow of {}: {}", key.file_path, e);
        }
        drop(wc);
        info!("Discarded working copy of {}", key.file_path);
        true
    }

    async fn persist(&self, wc: &WorkingCopy) {
        if !self.settings.persist {
            return;
        }
        let key = wc.key();
        if let Err(e) = self
            .storage
            .write_shadow(&key.project_path, &key.file_path, wc.content())
            .await
        {
            warn!("Failed to persist working copy of {}: {}", key.file_path, e);
        }
    }
}

fn snapshot(wc: &WorkingCopy) -> Snapshot {
    Snapshot {
        key: wc.key().clone(),
        owner_id: wc.key().file_path.clone(),
        content: wc.content().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChangeTarget, Delta};
    use anyhow::Result;
    use std::fs;
    use std::path::Path;

    fn store_with(root: &Path, settings: StoreSettings) -> WorkingCopyStore {
        let registry = Arc::new(ProjectRegistry::new(root.to_path_buf()));
        let storage = WorkingCopyStorage::new(registry.clone(), ".tandem");
        WorkingCopyStore::new(registry, storage, settings)
    }

    fn workspace(content: &str) -> Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj"))?;
        fs::write(dir.path().join("proj/a.txt"), content)?;
        Ok(dir)
    }

    fn env(delta: &Delta, seq: Option<u64>) -> EditorChanges {
        EditorChanges::encode(
            delta,
            &ChangeTarget {
                owner_id: "owner-1".to_string(),
                project_path: "/proj".to_string(),
                file_location: "/proj/a.txt".to_string(),
            },
            OffsetEncoding::Utf16,
            seq,
        )
    }

    fn shadow(dir: &Path) -> std::path::PathBuf {
        dir.join("proj/.tandem/workingCopies/proj.a.txt")
    }

    #[tokio::test]
    async fn test_start_copies_real_file() -> Result<()> {
        let dir = workspace("hello")?;
        let store = store_with(dir.path(), StoreSettings::default());

        let snap = store.on_tracking_start("/proj/a.txt").await?;
        assert_eq!(snap.content, "hello");
        assert_eq!(snap.key.project_path, "/proj");
        assert_eq!(fs::read_to_string(shadow(dir.path()))?, "hello");
        assert_eq!(
            store.tracking_state("/proj/a.txt").await,
            Some(TrackingState::Started)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_lazily_creates_and_tags_owner() -> Result<()> {
        let dir = workspace("hello")?;
        let store = store_with(dir.path(), StoreSettings::default());

        let outcome = store.apply_delta(&env(&Delta::insert(5, " world"), None)).await?;
        let ApplyOutcome::Applied(applied) = outcome else {
            anyhow::bail!("expected applied outcome");
        };
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1.owner_id, "owner-1");
        assert_eq!(applied[0].1.content, "hello world");
        assert_eq!(fs::read_to_string(shadow(dir.path()))?, "hello world");
        // The real file is never touched
        assert_eq!(fs::read_to_string(dir.path().join("proj/a.txt"))?, "hello");
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_accepts_sequence_from_one() -> Result<()> {
        let dir = workspace("abc")?;
        for verify_on_start in [true, false] {
            let store = store_with(
                dir.path(),
                StoreSettings {
                    verify_on_start,
                    persist: false,
                    ..StoreSettings::default()
                },
            );

            store.on_tracking_start("/proj/a.txt").await?;
            store.apply_delta(&env(&Delta::insert(3, "x"), Some(1))).await?;
            store.apply_delta(&env(&Delta::remove(3, 1), Some(2))).await?;

            // A reopened editor counts from 1 again
            store.on_tracking_start("/proj/a.txt").await?;
            let outcome = store.apply_delta(&env(&Delta::insert(0, "N"), Some(1))).await?;
            assert!(matches!(outcome, ApplyOutcome::Applied(_)));
            assert_eq!(store.content("/proj/a.txt").await.as_deref(), Some("Nabc"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delta_for_wrong_project_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("proj/sub"))?;
        fs::write(dir.path().join("proj/sub/a.txt"), "abc")?;
        let registry = Arc::new(ProjectRegistry::with_projects(
            dir.path().to_path_buf(),
            &["/proj".to_string(), "/proj/sub".to_string()],
        )?);
        let storage = WorkingCopyStorage::new(registry.clone(), ".tandem");
        let store = WorkingCopyStore::new(registry, storage, StoreSettings::default());

        store.on_tracking_start("/proj/sub/a.txt").await?;

        let outer = EditorChanges::encode(
            &Delta::insert(0, "x"),
            &ChangeTarget {
                owner_id: "owner-1".to_string(),
                project_path: "/proj".to_string(),
                file_location: "/proj/sub/a.txt".to_string(),
            },
            OffsetEncoding::Utf16,
            None,
        );
        let err = store.apply_delta(&outer).await;
        assert!(matches!(err, Err(SyncError::ProjectResolution { .. })));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.content("/proj/sub/a.txt").await.as_deref(), Some("abc"));

        store.on_tracking_stop("/proj/sub/a.txt").await?;
        assert!(store.is_empty().await);
        assert!(!dir.path().join("proj/.tandem/workingCopies/proj.sub.a.txt").exists());
        assert!(
            !dir
                .path()
                .join("proj/sub/.tandem/workingCopies/proj.sub.a.txt")
                .exists()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_suspended_skips_deltas() -> Result<()> {
        let dir = workspace("abc")?;
        let store = store_with(dir.path(), StoreSettings::default());
        store.on_tracking_start("/proj/a.txt").await?;
        store.on_tracking_suspend("/proj/a.txt").await?;

        let outcome = store.apply_delta(&env(&Delta::insert(0, "x"), None)).await?;
        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert_eq!(store.content("/proj/a.txt").await.as_deref(), Some("abc"));

        store.on_tracking_resume("/proj/a.txt").await?;
        store.apply_delta(&env(&Delta::insert(0, "x"), None)).await?;
        assert_eq!(store.content("/proj/a.txt").await.as_deref(), Some("xabc"));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_delta_rejected_content_kept() -> Result<()> {
        let dir = workspace("abc")?;
        let store = store_with(dir.path(), StoreSettings::default());
        store.on_tracking_start("/proj/a.txt").await?;

        let err = store.apply_delta(&env(&Delta::remove(1, 10), None)).await;
        assert!(matches!(err, Err(SyncError::InvalidDelta { .. })));
        assert_eq!(store.content("/proj/a.txt").await.as_deref(), Some("abc"));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_verifies_persisted_shadow() -> Result<()> {
        let dir = workspace("real content")?;
        let stale = shadow(dir.path());
        fs::create_dir_all(stale.parent().ok_or_else(|| anyhow::anyhow!("no parent"))?)?;
        fs::write(&stale, "stale shadow")?;

        let store = store_with(dir.path(), StoreSettings::default());
        let snap = store.on_tracking_start("/proj/a.txt").await?;
        assert_eq!(snap.content, "real content");
        assert_eq!(fs::read_to_string(&stale)?, "real content");
        Ok(())
    }

    #[tokio::test]
    async fn test_start_without_verification_reuses_shadow() -> Result<()> {
        let dir = workspace("real content")?;
        let stale = shadow(dir.path());
        fs::create_dir_all(stale.parent().ok_or_else(|| anyhow::anyhow!("no parent"))?)?;
        fs::write(&stale, "edited elsewhere")?;

        let settings = StoreSettings {
            verify_on_start: false,
            ..StoreSettings::default()
        };
        let store = store_with(dir.path(), settings);
        let snap = store.on_tracking_start("/proj/a.txt").await?;
        assert_eq!(snap.content, "edited elsewhere");
        Ok(())
    }

    #[tokio::test]
    async fn test_move_preserves_content() -> Result<()> {
        let dir = workspace("abc")?;
        let store = store_with(dir.path(), StoreSettings::default());
        store.on_tracking_start("/proj/a.txt").await?;
        store.apply_delta(&env(&Delta::insert(3, "d"), None)).await?;

        let moved = store.on_tracking_move("/proj/a.txt", "/proj/b.txt").await?;
        assert_eq!(moved.map(|s| s.content).as_deref(), Some("abcd"));
        assert!(store.content("/proj/a.txt").await.is_none());
        assert_eq!(store.content("/proj/b.txt").await.as_deref(), Some("abcd"));
        assert!(!shadow(dir.path()).exists());
        assert!(dir.path().join("proj/.tandem/workingCopies/proj.b.txt").exists());

        // Unknown source is a no-op
        assert!(store.on_tracking_move("/proj/zz.txt", "/proj/yy.txt").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_removes_everything() -> Result<()> {
        let dir = workspace("abc")?;
        let store = store_with(dir.path(), StoreSettings::default());
        store.on_tracking_start("/proj/a.txt").await?;
        store.on_tracking_stop("/proj/a.txt").await?;

        assert!(store.is_empty().await);
        assert!(!shadow(dir.path()).exists());
        assert_eq!(store.tracking_state("/proj/a.txt").await, None);

        // Stopping again is silent
        store.on_tracking_stop("/proj/a.txt").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_project_aborts() -> Result<()> {
        let dir = workspace("abc")?;
        fs::write(dir.path().join("top.txt"), "t")?;
        let store = store_with(dir.path(), StoreSettings::default());

        let err = store.on_tracking_start("/top.txt").await;
        assert!(matches!(err, Err(SyncError::ProjectResolution { .. })));
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_discard_project() -> Result<()> {
        let dir = workspace("abc")?;
        fs::write(dir.path().join("proj/b.txt"), "b")?;
        let store = store_with(dir.path(), StoreSettings::default());
        store.on_tracking_start("/proj/a.txt").await?;
        store.on_tracking_start("/proj/b.txt").await?;

        let discarded = store.discard_project("/proj").await?;
        assert_eq!(discarded, vec!["/proj/a.txt".to_string(), "/proj/b.txt".to_string()]);
        assert!(store.is_empty().await);
        assert!(!dir.path().join("proj/.tandem/workingCopies").exists());
        assert_eq!(store.tracking_state("/proj/b.txt").await, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_only_store() -> Result<()> {
        let dir = workspace("abc")?;
        let settings = StoreSettings {
            persist: false,
            ..StoreSettings::default()
        };
        let store = store_with(dir.path(), settings);
        store.apply_delta(&env(&Delta::insert(0, ">"), Some(1))).await?;
        assert_eq!(store.content("/proj/a.txt").await.as_deref(), Some(">abc"));
        assert!(!shadow(dir.path()).exists());

        assert!(store.discard_file("/proj/a.txt").await?);
        assert!(!store.discard_file("/proj/a.txt").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_buffered_then_applied() -> Result<()> {
        let dir = workspace("")?;
        let store = store_with(dir.path(), StoreSettings::default());
        store.apply_delta(&env(&Delta::insert(0, "a"), Some(1))).await?;

        let held = store.apply_delta(&env(&Delta::insert(2, "c"), Some(3))).await?;
        assert_eq!(held, ApplyOutcome::Buffered { seq: 3 });

        let ApplyOutcome::Applied(applied) =
            store.apply_delta(&env(&Delta::insert(1, "b"), Some(2))).await?
        else {
            anyhow::bail!("expected applied outcome");
        };
        let contents: Vec<&str> = applied.iter().map(|(_, s)| s.content.as_str()).collect();
        assert_eq!(contents, vec!["ab", "abc"]);
        Ok(())
    }
}
