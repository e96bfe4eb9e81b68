// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Workspace side: shadows of open editor documents.

/// Unix socket listener for editor endpoints.
pub mod endpoint;
/// Workspace paths and project resolution.
pub mod project;
/// Per-file reconciliation workers.
pub mod reconcile;
/// On-disk shadow layout.
pub mod storage;
/// The working-copy store.
pub mod store;
/// Notification dispatch.
pub mod tracker;
/// Tracking sessions.
pub mod tracking;
/// A single working copy.
pub mod working_copy;

pub use endpoint::EndpointServer;
pub use project::ProjectRegistry;
pub use reconcile::{
    Diagnostic, ReconcileOutcome, ReconcileRequest, ReconciliationEngine, Reconciler,
};
pub use storage::WorkingCopyStorage;
pub use store::{ApplyOutcome, Snapshot, StoreSettings, WorkingCopyStore};
pub use tracker::ChangeTracker;
pub use tracking::TrackingState;
pub use working_copy::{WorkingCopy, WorkingCopyKey};
