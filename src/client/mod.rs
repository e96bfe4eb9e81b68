// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Per-document autosave state machine.
pub mod autosave;
/// Queue of deltas awaiting a flush.
pub mod dirty_region;
/// Host editor collaborators.
pub mod editor;
/// Actor that drives a controller from editor events and its timer.
pub mod task;
/// Debounce deadline.
pub mod timer;
/// Delivery of encoded changes to the workspace.
pub mod transmitter;

pub use autosave::{AutoSaveController, AutoSaveMode, AutoSaveSettings};
pub use dirty_region::{DirtyRegion, DirtyRegionQueue};
pub use editor::{DocumentChange, ENABLE_AUTO_SAVE, EditorDocument, PreferenceStore};
pub use task::{AutoSaveHandle, AutoSaveTask, EditorEvent};
pub use timer::DebounceTimer;
pub use transmitter::{ChangeTransmitter, SocketTransmitter};
