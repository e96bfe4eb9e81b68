// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for change synchronization.
//!
//! None of these errors ever crash a session. Delta and tracking failures are
//! logged and the offending operation is aborted; the client recovers through
//! its next `Resuming` snapshot.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while decoding, applying or routing editor changes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A delta whose offset or length falls outside the current content, or
    /// that violates the per-kind shape rules.
    #[error("invalid delta for {path}: {reason}")]
    InvalidDelta {
        /// Workspace path of the target file.
        path: String,
        /// What was wrong with the delta.
        reason: String,
    },

    /// A wire envelope that cannot be decoded into a delta at all.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// An operation referenced a file that has no working copy.
    #[error("no working copy for {path}")]
    UnknownWorkingCopy {
        /// Workspace path of the file.
        path: String,
    },

    /// A sequenced delta that is older than what was already applied.
    #[error("stale delta for {path}: seq {seq} <= last applied {last}")]
    StaleDelta {
        /// Workspace path of the file.
        path: String,
        /// Sequence number carried by the delta.
        seq: u64,
        /// Last sequence number applied to the working copy.
        last: u64,
    },

    /// Too many deltas are waiting for a missing predecessor.
    #[error("sequence gap for {path}: expected {expected}, got {got}")]
    SequenceGap {
        /// Workspace path of the file.
        path: String,
        /// Next sequence number the working copy can accept.
        expected: u64,
        /// Sequence number that arrived.
        got: u64,
    },

    /// The remote endpoint could not be reached. Never retried.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A file path could not be mapped to a registered project.
    #[error("cannot resolve project for {path}")]
    ProjectResolution {
        /// Workspace path that failed to resolve.
        path: String,
    },

    /// A path escapes the workspace root.
    #[error("path is outside the workspace: {path}")]
    PathOutsideWorkspace {
        /// The offending path as received.
        path: String,
    },

    /// Filesystem failure while reading or persisting a file.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The reconciliation engine failed.
    #[error("reconciliation failed: {0}")]
    Engine(String),
}

impl SyncError {
    /// Builds an [`SyncError::InvalidDelta`].
    pub fn invalid_delta(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDelta {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly name, used in session events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidDelta { .. } => "invalid_delta",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::UnknownWorkingCopy { .. } => "unknown_working_copy",
            Self::StaleDelta { .. } => "stale_delta",
            Self::SequenceGap { .. } => "sequence_gap",
            Self::TransportUnavailable(_) => "transport_unavailable",
            Self::ProjectResolution { .. } => "project_resolution",
            Self::PathOutsideWorkspace { .. } => "path_outside_workspace",
            Self::Io { .. } => "io",
            Self::Engine(_) => "engine",
        }
    }
}

/// Result alias for synchronization operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
