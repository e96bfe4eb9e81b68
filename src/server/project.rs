// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Workspace paths and project resolution.
//!
//! Clients address files by workspace path: an absolute-looking path such as
//! `/proj/src/main.rs` rooted at the workspace directory. A project is a
//! directory under the root; by default every top-level directory is one.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::protocol::wire::is_proper_ancestor;

/// Maps workspace paths to real paths and owning projects.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    root: PathBuf,
    canonical_root: PathBuf,
    projects: Option<Vec<String>>,
}

impl ProjectRegistry {
    /// Treats every top-level directory of `root` as a project.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        debug!("Workspace root: {}", canonical_root.display());
        Self {
            root,
            canonical_root,
            projects: None,
        }
    }

    /// Uses an explicit project list instead of discovery. Nested projects
    /// resolve to the deepest match.
    ///
    /// # Errors
    ///
    /// Returns an error if a project path is malformed.
    pub fn with_projects(root: PathBuf, projects: &[String]) -> SyncResult<Self> {
        let mut registry = Self::new(root);
        let projects = projects
            .iter()
            .map(|p| normalize(p))
            .collect::<SyncResult<Vec<_>>>()?;
        registry.projects = Some(projects);
        Ok(registry)
    }

    /// Workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalizes a workspace path: leading `/`, no empty or `.` segments.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PathOutsideWorkspace`] if the path contains `..`.
    pub fn normalize(&self, path: &str) -> SyncResult<String> {
        normalize(path)
    }

    /// Real filesystem path of a workspace path.
    ///
    /// Existing files are canonicalized and must stay under the root after
    /// symlinks are resolved.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PathOutsideWorkspace`] if the path escapes the
    /// root.
    pub fn real_path(&self, path: &str) -> SyncResult<PathBuf> {
        let normalized = normalize(path)?;
        let joined = self.root.join(normalized.trim_start_matches('/'));

        if let Ok(canonical) = joined.canonicalize()
            && !canonical.starts_with(&self.canonical_root)
        {
            return Err(SyncError::PathOutsideWorkspace {
                path: path.to_string(),
            });
        }
        Ok(joined)
    }

    /// Converts a real filesystem path under the root into a workspace path.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PathOutsideWorkspace`] if the path is not under
    /// the root.
    pub fn workspace_path(&self, real: &Path) -> SyncResult<String> {
        let outside = || SyncError::PathOutsideWorkspace {
            path: real.display().to_string(),
        };
        let absolute = real.canonicalize().unwrap_or_else(|_| real.to_path_buf());
        let relative = absolute
            .strip_prefix(&self.canonical_root)
            .or_else(|_| absolute.strip_prefix(&self.root))
            .map_err(|_| outside())?;

        let mut out = String::new();
        for component in relative.components() {
            let Component::Normal(segment) = component else {
                return Err(outside());
            };
            out.push('/');
            out.push_str(&segment.to_string_lossy());
        }
        if out.is_empty() {
            return Err(outside());
        }
        Ok(out)
    }

    /// Finds the project that owns `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ProjectResolution`] when no registered project is
    /// a proper ancestor of the path.
    pub fn resolve_project(&self, path: &str) -> SyncResult<String> {
        let normalized = normalize(path)?;
        let unresolved = || SyncError::ProjectResolution {
            path: path.to_string(),
        };

        if let Some(projects) = &self.projects {
            return projects
                .iter()
                .filter(|p| is_proper_ancestor(p, &normalized))
                .max_by_key(|p| p.len())
                .cloned()
                .ok_or_else(unresolved);
        }

        let top = normalized
            .trim_start_matches('/')
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(unresolved)?;
        let project = format!("/{top}");

        if project == normalized || !self.root.join(top).is_dir() {
            return Err(unresolved());
        }
        Ok(project)
    }

    /// Whether `project` is a registered project.
    #[must_use]
    pub fn is_project(&self, project: &str) -> bool {
        let Ok(normalized) = normalize(project) else {
            return false;
        };
        self.projects.as_ref().map_or_else(
            || {
                normalized.matches('/').count() == 1
                    && self.root.join(normalized.trim_start_matches('/')).is_dir()
            },
            |projects| projects.contains(&normalized),
        )
    }
}

fn normalize(path: &str) -> SyncResult<String> {
    let mut out = String::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(SyncError::PathOutsideWorkspace {
                    path: path.to_string(),
                });
            }
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}
