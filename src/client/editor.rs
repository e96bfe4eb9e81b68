// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Collaborators the autosave controller needs from the host editor.

use anyhow::Result;

use crate::protocol::Delta;

/// Preference key controlling local autosave.
pub const ENABLE_AUTO_SAVE: &str = "editor.autoSave";

/// The document an [`AutoSaveController`](super::AutoSaveController) is
/// installed on.
pub trait EditorDocument: Send {
    /// Workspace path of the file.
    fn location(&self) -> String;

    /// Current full text.
    fn contents(&self) -> String;

    /// Whether the buffer differs from the file on disk.
    fn is_dirty(&self) -> bool;

    /// Writes the buffer to the real file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn save(&mut self) -> Result<()>;

    /// Workspace path of the owning project, when the file belongs to one
    /// that still exists.
    fn project(&self) -> Option<String>;
}

/// Read access to persisted editor preferences.
pub trait PreferenceStore: Send {
    /// Boolean preference, `None` when never set.
    fn get_bool(&self, key: &str) -> Option<bool>;
}

impl PreferenceStore for Option<bool> {
    fn get_bool(&self, key: &str) -> Option<bool> {
        if key == ENABLE_AUTO_SAVE { *self } else { None }
    }
}

/// One edit reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    /// Workspace path of the document that changed.
    pub document: String,
    /// Start of the edit.
    pub offset: usize,
    /// Length of the inserted text.
    pub length: usize,
    /// Number of units removed at `offset`.
    pub removed_char_count: usize,
    /// Inserted text, empty for a pure removal.
    pub text: String,
}

impl DocumentChange {
    /// An insertion of `text` at `offset`.
    pub fn insert(document: impl Into<String>, offset: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            document: document.into(),
            offset,
            length: text.chars().count(),
            removed_char_count: 0,
            text,
        }
    }

    /// A removal of `count` units at `offset`.
    pub fn remove(document: impl Into<String>, offset: usize, count: usize) -> Self {
        Self {
            document: document.into(),
            offset,
            length: 0,
            removed_char_count: count,
            text: String::new(),
        }
    }

    /// `count` units at `offset` replaced by `text`.
    pub fn replace(
        document: impl Into<String>,
        offset: usize,
        count: usize,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            document: document.into(),
            offset,
            length: text.chars().count(),
            removed_char_count: count,
            text,
        }
    }

    /// Splits the edit into the deltas that reproduce it.
    ///
    /// A replacement becomes a removal followed by an insertion at the same
    /// offset. An edit that neither inserts nor removes yields nothing.
    #[must_use]
    pub fn to_deltas(&self) -> Vec<Delta> {
        match (self.removed_char_count, self.text.is_empty()) {
            (0, true) => Vec::new(),
            (0, false) => vec![Delta::insert(self.offset, self.text.clone())],
            (count, true) => vec![Delta::remove(self.offset, count)],
            (count, false) => vec![
                Delta::remove(self.offset, count),
                Delta::insert(self.offset, self.text.clone()),
            ],
        }
    }
}
