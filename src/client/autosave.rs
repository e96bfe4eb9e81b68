// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-document autosave and change streaming.
//!
//! The controller observes document edits, turns them into deltas, and
//! flushes them when the debounce timer fires. While the link to the
//! workspace is suspended it drops edits; on resume it sends one full
//! snapshot instead of the queued deltas.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dirty_region::DirtyRegionQueue;
use super::editor::{DocumentChange, ENABLE_AUTO_SAVE, EditorDocument, PreferenceStore};
use super::timer::{DEFAULT_DELAY, DebounceTimer};
use super::transmitter::ChangeTransmitter;
use crate::protocol::{ChangeTarget, Delta, EditorChanges, OffsetEncoding};

/// Autosave state of one open document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AutoSaveMode {
    /// Saves locally and streams changes.
    #[default]
    Activated,
    /// Streams changes without saving locally.
    Deactivated,
    /// Link to the workspace is down; edits are dropped.
    Suspended,
    /// Link is back; the next flush sends a full snapshot.
    Resuming,
}

impl AutoSaveMode {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::Deactivated => "deactivated",
            Self::Suspended => "suspended",
            Self::Resuming => "resuming",
        }
    }
}

/// Tunables for a controller.
#[derive(Debug, Clone)]
pub struct AutoSaveSettings {
    /// Quiet period before a flush.
    pub delay: Duration,
    /// Unit for transmitted offsets.
    pub encoding: OffsetEncoding,
    /// Owner id stamped on every envelope. Editors showing the same file in
    /// several views give each view its own; defaults to the file location.
    pub owner_id: Option<String>,
}

impl Default for AutoSaveSettings {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            encoding: OffsetEncoding::default(),
            owner_id: None,
        }
    }
}

/// Autosave state machine for one document.
pub struct AutoSaveController<D, P, T> {
    document: D,
    preferences: P,
    transmitter: T,
    encoding: OffsetEncoding,
    owner_id: Option<String>,
    mode: AutoSaveMode,
    queue: DirtyRegionQueue,
    timer: DebounceTimer,
    active_editor: bool,
    next_seq: u64,
}

impl<D, P, T> AutoSaveController<D, P, T>
where
    D: EditorDocument,
    P: PreferenceStore,
    T: ChangeTransmitter,
{
    /// Installs a controller on `document`, applying the stored preference.
    pub fn install(
        document: D,
        preferences: P,
        transmitter: T,
        settings: AutoSaveSettings,
        now: Instant,
    ) -> Self {
        let mut controller = Self {
            document,
            preferences,
            transmitter,
            encoding: settings.encoding,
            owner_id: settings.owner_id,
            mode: AutoSaveMode::default(),
            queue: DirtyRegionQueue::new(),
            timer: DebounceTimer::new(settings.delay),
            active_editor: true,
            next_seq: 1,
        };
        controller.on_settings_changed(now);
        controller
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> AutoSaveMode {
        self.mode
    }

    /// Number of deltas waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// When the debounce timer fires next, if armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// The document this controller is installed on.
    pub const fn document(&self) -> &D {
        &self.document
    }

    /// Mutable access to the document, for editors that own it here.
    pub const fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    /// Switches to [`AutoSaveMode::Activated`] and re-arms the timer, unless
    /// autosave is explicitly disabled in preferences.
    pub fn activate(&mut self, now: Instant) {
        if self.preferences.get_bool(ENABLE_AUTO_SAVE) == Some(false) {
            return;
        }
        self.mode = AutoSaveMode::Activated;
        self.timer.schedule(now);
    }

    /// Switches to [`AutoSaveMode::Deactivated`]. Ignored while suspended.
    pub fn deactivate(&mut self) {
        if self.mode == AutoSaveMode::Suspended {
            return;
        }
        self.mode = AutoSaveMode::Deactivated;
        self.timer.cancel();
    }

    /// The workspace stopped accepting changes for this file.
    pub fn on_tracking_suspended(&mut self) {
        debug!("Autosave suspended for {}", self.document.location());
        self.mode = AutoSaveMode::Suspended;
        self.timer.cancel();
    }

    /// The workspace accepts changes again; the next flush resynchronizes.
    pub fn on_tracking_resumed(&mut self, now: Instant) {
        debug!("Autosave resuming for {}", self.document.location());
        self.mode = AutoSaveMode::Resuming;
        self.timer.schedule(now);
    }

    /// Another part (or this editor) became active.
    pub const fn on_active_part_changed(&mut self, is_this_editor: bool) {
        self.active_editor = is_this_editor;
    }

    /// Re-reads the autosave preference. An unset preference changes nothing.
    pub fn on_settings_changed(&mut self, now: Instant) {
        match self.preferences.get_bool(ENABLE_AUTO_SAVE) {
            Some(false) if self.mode != AutoSaveMode::Deactivated => self.deactivate(),
            Some(true) if self.mode != AutoSaveMode::Activated => self.activate(now),
            _ => {}
        }
    }

    /// Records an edit and re-arms the debounce timer.
    ///
    /// Edits to other documents and edits while suspended are ignored. When
    /// this editor is not the active part the edit is not queued, but the
    /// timer still restarts.
    pub fn on_document_change(&mut self, change: &DocumentChange, now: Instant) {
        if self.mode == AutoSaveMode::Suspended || change.document != self.document.location() {
            return;
        }

        if self.active_editor {
            for delta in change.to_deltas() {
                self.queue.add(delta, now);
            }
        }

        self.timer.schedule(now);
    }

    /// Fires the timer if it is due. Returns whether a flush happened.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.timer.take_due(now) {
            self.save();
            true
        } else {
            false
        }
    }

    /// Flushes immediately, as if the timer had fired.
    pub fn save(&mut self) {
        if self.mode == AutoSaveMode::Suspended {
            return;
        }

        let project = self.document.project();

        if self.mode == AutoSaveMode::Resuming
            && let Some(project) = project.as_deref()
        {
            let dropped = self.queue.purge();
            let content = self.document.contents();
            debug!(
                "Resynchronizing {} ({} queued deltas superseded)",
                self.document.location(),
                dropped
            );
            self.send(&Delta::replace_all(content), project);

            self.mode = if self.preferences.get_bool(ENABLE_AUTO_SAVE) == Some(false) {
                AutoSaveMode::Deactivated
            } else {
                AutoSaveMode::Activated
            };
            return;
        }

        if self.mode == AutoSaveMode::Activated
            && self.document.is_dirty()
            && let Err(e) = self.document.save()
        {
            warn!("Autosave of {} failed: {:#}", self.document.location(), e);
        }

        let Some(project) = project else {
            let dropped = self.queue.purge();
            if dropped > 0 {
                info!(
                    "No project for {}, dropped {} deltas",
                    self.document.location(),
                    dropped
                );
            }
            return;
        };

        while let Some(region) = self.queue.remove_next() {
            self.send(&region.delta, &project);
        }
    }

    fn send(&mut self, delta: &Delta, project: &str) {
        let location = self.document.location();
        let target = ChangeTarget {
            owner_id: self.owner_id.clone().unwrap_or_else(|| location.clone()),
            project_path: project.to_string(),
            file_location: location,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.transmitter
            .transmit(EditorChanges::encode(delta, &target, self.encoding, Some(seq)));
    }
}
