// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! On-disk layout of persisted working copies and access to real files.
//!
//! Shadows live at `<project>/<metadata_dir>/workingCopies/<flattened>`,
//! where the flattened name is the workspace path without its leading `/`
//! and with every `/` replaced by `.`.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, trace};

use super::project::ProjectRegistry;
use crate::error::{SyncError, SyncResult};

const WORKING_COPIES_DIR: &str = "workingCopies";

/// File name a shadow is stored under.
#[must_use]
pub fn flatten(path: &str) -> String {
    path.trim_start_matches('/').replace('/', ".")
}

/// Reads real files and reads/writes persisted shadows.
#[derive(Debug, Clone)]
pub struct WorkingCopyStorage {
    registry: Arc<ProjectRegistry>,
    metadata_dir: String,
}

impl WorkingCopyStorage {
    /// Creates storage rooted at the registry's workspace.
    #[must_use]
    pub fn new(registry: Arc<ProjectRegistry>, metadata_dir: impl Into<String>) -> Self {
        Self {
            registry,
            metadata_dir: metadata_dir.into(),
        }
    }

    /// Directory holding a project's shadows.
    ///
    /// # Errors
    ///
    /// Returns an error if the project path escapes the workspace.
    pub fn shadow_dir(&self, project: &str) -> SyncResult<PathBuf> {
        Ok(self
            .registry
            .real_path(project)?
            .join(&self.metadata_dir)
            .join(WORKING_COPIES_DIR))
    }

    /// Path of one file's shadow.
    ///
    /// # Errors
    ///
    /// Returns an error if the project path escapes the workspace.
    pub fn shadow_path(&self, project: &str, file: &str) -> SyncResult<PathBuf> {
        Ok(self.shadow_dir(project)?.join(flatten(file)))
    }

    /// Reads the real file. A missing file reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path escapes the workspace or the file cannot
    /// be read.
    pub async fn read_real(&self, file: &str) -> SyncResult<Option<String>> {
        let path = self.registry.real_path(file)?;
        read_optional(path).await
    }

    /// Reads a persisted shadow, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the shadow exists but cannot be read.
    pub async fn read_shadow(&self, project: &str, file: &str) -> SyncResult<Option<String>> {
        read_optional(self.shadow_path(project, file)?).await
    }

    /// Writes a shadow, creating the storage directory as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn write_shadow(&self, project: &str, file: &str, content: &str) -> SyncResult<()> {
        let dir = self.shadow_dir(project)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::io(&dir, e))?;
        let path = dir.join(flatten(file));
        fs::write(&path, content)
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        trace!("Persisted shadow {}", path.display());
        Ok(())
    }

    /// Deletes a shadow. Missing shadows are fine.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing shadow cannot be removed.
    pub async fn remove_shadow(&self, project: &str, file: &str) -> SyncResult<()> {
        let path = self.shadow_path(project, file)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed shadow {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&path, e)),
        }
    }

    /// Renames a shadow in place. Missing shadows are fine.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing shadow cannot be renamed.
    pub async fn rename_shadow(
        &self,
        old_project: &str,
        old_file: &str,
        new_project: &str,
        new_file: &str,
    ) -> SyncResult<()> {
        let from = self.shadow_path(old_project, old_file)?;
        let to_dir = self.shadow_dir(new_project)?;
        let to = to_dir.join(flatten(new_file));

        if fs::try_exists(&from).await.unwrap_or(false) {
            fs::create_dir_all(&to_dir)
                .await
                .map_err(|e| SyncError::io(&to_dir, e))?;
            fs::rename(&from, &to)
                .await
                .map_err(|e| SyncError::io(&from, e))?;
            debug!("Renamed shadow {} -> {}", from.display(), to.display());
        }
        Ok(())
    }

    /// Deletes a project's whole shadow directory.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing directory cannot be removed.
    pub async fn remove_project(&self, project: &str) -> SyncResult<()> {
        let dir = self.shadow_dir(project)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&dir, e)),
        }
    }
}

async fn read_optional(path: PathBuf) -> SyncResult<Option<String>> {
    match fs::read_to_string(&path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(&path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn storage() -> Result<(tempfile::TempDir, WorkingCopyStorage)> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("proj/src"))?;
        std::fs::write(dir.path().join("proj/src/a.rs"), "real")?;
        let registry = Arc::new(ProjectRegistry::new(dir.path().to_path_buf()));
        Ok((dir, WorkingCopyStorage::new(registry, ".tandem")))
    }

    #[test]
    fn test_flatten() {
        assert_eq!(flatten("/proj/src/main.rs"), "proj.src.main.rs");
        assert_eq!(flatten("a.txt"), "a.txt");
    }

    #[tokio::test]
    async fn test_shadow_lifecycle() -> Result<()> {
        let (dir, storage) = storage()?;

        assert_eq!(storage.read_real("/proj/src/a.rs").await?.as_deref(), Some("real"));
        assert_eq!(storage.read_real("/proj/src/none.rs").await?, None);

        storage.write_shadow("/proj", "/proj/src/a.rs", "shadow").await?;
        let on_disk = dir.path().join("proj/.tandem/workingCopies/proj.src.a.rs");
        assert_eq!(std::fs::read_to_string(&on_disk)?, "shadow");

        storage
            .rename_shadow("/proj", "/proj/src/a.rs", "/proj", "/proj/src/b.rs")
            .await?;
        assert!(!on_disk.exists());
        assert_eq!(
            storage.read_shadow("/proj", "/proj/src/b.rs").await?.as_deref(),
            Some("shadow")
        );

        storage.remove_shadow("/proj", "/proj/src/b.rs").await?;
        storage.remove_shadow("/proj", "/proj/src/b.rs").await?;
        assert_eq!(storage.read_shadow("/proj", "/proj/src/b.rs").await?, None);

        storage.write_shadow("/proj", "/proj/src/c.rs", "c").await?;
        storage.remove_project("/proj").await?;
        assert!(!dir.path().join("proj/.tandem/workingCopies").exists());
        Ok(())
    }
}
