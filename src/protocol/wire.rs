// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Wire payloads exchanged between an editor client and the workspace.
//!
//! Every payload travels as the `params` of a JSON-RPC notification; see
//! [`super::rpc`] for the envelope.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::delta::{Delta, DeltaKind};
use super::text::OffsetEncoding;
use crate::error::{SyncError, SyncResult};

/// Client to server: one delta for one file.
pub const EDITOR_CHANGES: &str = "track:editor-changes";
/// Client to server: file tracking lifecycle.
pub const FILE_OPERATION: &str = "track:file-operation";
/// Client to server: re-run reconciliation on the current shadow.
pub const RECONCILE: &str = "track:reconcile";
/// Client to server: a project left the workspace.
pub const PROJECT_REMOVED: &str = "track:project-removed";
/// Server to client: diagnostics and highlights for a working copy.
pub const RECONCILE_STATE_CHANGED: &str = "event:reconcile-state-changed";

/// Addressing shared by every delta a document emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTarget {
    /// Editing session that receives the reconcile result.
    pub owner_id: String,
    /// Workspace path of the owning project.
    pub project_path: String,
    /// Workspace path of the file.
    pub file_location: String,
}

/// Wire form of a single delta (`track:editor-changes`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorChanges {
    /// Delta kind.
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    /// Editing session that receives the reconcile result.
    #[serde(rename = "workingCopyOwnerID")]
    pub working_copy_owner_id: String,
    /// Workspace path of the owning project.
    pub project_path: String,
    /// Workspace path of the file.
    pub file_location: String,
    /// Offset of the change.
    #[serde(default)]
    pub offset: usize,
    /// Length of the inserted text. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Number of removed units (`REMOVE` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_char_count: Option<usize>,
    /// Inserted or replacement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Per-document sequence number, starting at 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EditorChanges {
    /// Encodes `delta` for `target`.
    #[must_use]
    pub fn encode(
        delta: &Delta,
        target: &ChangeTarget,
        encoding: OffsetEncoding,
        seq: Option<u64>,
    ) -> Self {
        let (length, removed_char_count, text) = match delta {
            Delta::Insert { text, .. } => (Some(encoding.len(text)), None, Some(text.clone())),
            Delta::Remove { length, .. } => (None, Some(*length), None),
            Delta::ReplaceAll { text } => (None, None, Some(text.clone())),
        };

        Self {
            kind: delta.kind(),
            working_copy_owner_id: target.owner_id.clone(),
            project_path: target.project_path.clone(),
            file_location: target.file_location.clone(),
            offset: delta.offset(),
            length,
            removed_char_count,
            text,
            seq,
        }
    }

    /// Decodes the envelope back into a [`Delta`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidEnvelope`] when the project path is not a
    /// proper ancestor of the file, or a `REPLACE_ALL` carries no text.
    /// Returns [`SyncError::InvalidDelta`] when an insert has no text or a
    /// removal has no positive length.
    pub fn decode(&self) -> SyncResult<Delta> {
        if !is_proper_ancestor(&self.project_path, &self.file_location) {
            return Err(SyncError::InvalidEnvelope(format!(
                "project {} does not contain {}",
                self.project_path, self.file_location
            )));
        }

        let delta = match self.kind {
            DeltaKind::Insert => Delta::Insert {
                offset: self.offset,
                text: self.text.clone().unwrap_or_default(),
            },
            DeltaKind::Remove => Delta::Remove {
                offset: self.offset,
                length: self.removed_char_count.unwrap_or(0),
            },
            DeltaKind::ReplaceAll => {
                let text = self.text.clone().ok_or_else(|| {
                    SyncError::InvalidEnvelope(format!(
                        "REPLACE_ALL for {} carries no text",
                        self.file_location
                    ))
                })?;
                Delta::ReplaceAll { text }
            }
        };

        delta
            .validate()
            .map_err(|reason| SyncError::invalid_delta(&self.file_location, reason))?;
        Ok(delta)
    }
}

/// Whether `ancestor` strictly contains `path`, compared by components.
#[must_use]
pub fn is_proper_ancestor(ancestor: &str, path: &str) -> bool {
    Path::new(path)
        .strip_prefix(Path::new(ancestor))
        .is_ok_and(|rest| !rest.as_os_str().is_empty())
}

/// File tracking lifecycle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOperationKind {
    /// An editor opened the file.
    Start,
    /// The editor closed the file.
    Stop,
    /// The link is going away; ignore deltas until resumed.
    Suspend,
    /// The link is back; a full snapshot follows.
    Resume,
    /// The file was renamed from `oldPath` to `path`.
    Move,
    /// The file was deleted; its working copy goes too.
    Delete,
}

impl FileOperationKind {
    /// Lowercase name, used in logs and session events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Move => "move",
            Self::Delete => "delete",
        }
    }
}

/// Wire form of a tracking event (`track:file-operation`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    /// Lifecycle transition.
    #[serde(rename = "type")]
    pub kind: FileOperationKind,
    /// Workspace path of the file (the new path for `MOVE`).
    pub path: String,
    /// Previous path, `MOVE` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

/// Parameters of `track:project-removed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRemoved {
    /// Workspace path of the project.
    pub project_path: String,
}

/// Parameters of `track:reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileParams {
    /// Workspace path of the file.
    pub path: String,
    /// Owner to tag the result with; defaults to the path.
    #[serde(
        rename = "workingCopyOwnerID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub working_copy_owner_id: Option<String>,
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    /// Human-readable message.
    pub message: String,
    /// Numeric problem id (`0` when the analyzer has none).
    pub id: i64,
    /// Error severity.
    pub error: bool,
    /// Warning severity.
    pub warning: bool,
    /// Start offset, inclusive.
    pub source_start: usize,
    /// End offset, inclusive.
    pub source_end: usize,
    /// One-based line of `sourceStart`.
    pub source_line_number: usize,
    /// Workspace path of the analyzed file.
    pub originating_file_name: String,
    /// Message arguments, if any.
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// One semantic highlight range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightedPosition {
    /// Start offset.
    pub offset: usize,
    /// Length in offset units.
    pub length: usize,
    /// Token type name.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Server to client result (`event:reconcile-state-changed`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStateChanged {
    /// Owner the result belongs to.
    #[serde(rename = "workingCopyOwnerID")]
    pub working_copy_owner_id: String,
    /// Diagnostics for the current content.
    pub problems: Vec<Problem>,
    /// Semantic highlights for the current content.
    pub highlighted_positions: Vec<HighlightedPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> ChangeTarget {
        ChangeTarget {
            owner_id: "/proj/src/main.rs".to_string(),
            project_path: "/proj".to_string(),
            file_location: "/proj/src/main.rs".to_string(),
        }
    }

    #[test]
    fn test_encode_insert_wire_shape() -> anyhow::Result<()> {
        let env = EditorChanges::encode(
            &Delta::insert(5, " w\u{1F600}"),
            &target(),
            OffsetEncoding::Utf16,
            Some(3),
        );
        let value = serde_json::to_value(&env)?;
        assert_eq!(
            value,
            json!({
                "type": "INSERT",
                "workingCopyOwnerID": "/proj/src/main.rs",
                "projectPath": "/proj",
                "fileLocation": "/proj/src/main.rs",
                "offset": 5,
                "length": 4,
                "text": " w\u{1F600}",
                "seq": 3
            })
        );
        Ok(())
    }

    #[test]
    fn test_encode_remove_has_no_text() -> anyhow::Result<()> {
        let env = EditorChanges::encode(&Delta::remove(0, 6), &target(), OffsetEncoding::Utf16, None);
        let value = serde_json::to_value(&env)?;
        assert_eq!(value["removedCharCount"], 6);
        assert!(value.get("text").is_none());
        assert!(value.get("seq").is_none());
        Ok(())
    }

    #[test]
    fn test_decode_from_client_json() -> anyhow::Result<()> {
        let env: EditorChanges = serde_json::from_value(json!({
            "type": "REMOVE",
            "workingCopyOwnerID": "w1",
            "projectPath": "/proj",
            "fileLocation": "/proj/a.txt",
            "offset": 1,
            "removedCharCount": 2
        }))?;
        assert_eq!(env.decode()?, Delta::remove(1, 2));
        Ok(())
    }

    #[test]
    fn test_decode_ignores_insert_length() -> anyhow::Result<()> {
        let mut env = EditorChanges::encode(&Delta::insert(0, "abc"), &target(), OffsetEncoding::Utf16, None);
        env.length = Some(99);
        assert_eq!(env.decode()?, Delta::insert(0, "abc"));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_zero_remove() {
        let env = EditorChanges::encode(&Delta::remove(0, 0), &target(), OffsetEncoding::Utf16, None);
        assert!(matches!(env.decode(), Err(SyncError::InvalidDelta { .. })));
    }

    #[test]
    fn test_decode_rejects_empty_insert() {
        let mut env = EditorChanges::encode(&Delta::insert(0, "x"), &target(), OffsetEncoding::Utf16, None);
        env.text = None;
        assert!(matches!(env.decode(), Err(SyncError::InvalidDelta { .. })));
    }

    #[test]
    fn test_decode_replace_all_requires_text() {
        let mut env = EditorChanges::encode(&Delta::replace_all(""), &target(), OffsetEncoding::Utf16, None);
        assert!(env.decode().is_ok());
        env.text = None;
        assert!(matches!(env.decode(), Err(SyncError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_foreign_project() {
        let mut env = EditorChanges::encode(&Delta::insert(0, "x"), &target(), OffsetEncoding::Utf16, None);
        env.project_path = "/other".to_string();
        assert!(matches!(env.decode(), Err(SyncError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_proper_ancestor() {
        assert!(is_proper_ancestor("/proj", "/proj/a.rs"));
        assert!(is_proper_ancestor("/proj", "/proj/src/a.rs"));
        assert!(!is_proper_ancestor("/proj", "/proj"));
        assert!(!is_proper_ancestor("/proj", "/project/a.rs"));
    }

    #[test]
    fn test_file_operation_move() -> anyhow::Result<()> {
        let op: FileOperation = serde_json::from_value(json!({
            "type": "MOVE",
            "path": "/proj/b.rs",
            "oldPath": "/proj/a.rs"
        }))?;
        assert_eq!(op.kind, FileOperationKind::Move);
        assert_eq!(op.old_path.as_deref(), Some("/proj/a.rs"));

        let start: FileOperation = serde_json::from_value(json!({"type": "START", "path": "/proj/a.rs"}))?;
        assert_eq!(start.old_path, None);
        Ok(())
    }

    #[test]
    fn test_reconcile_result_wire_shape() -> anyhow::Result<()> {
        let result = ReconcileStateChanged {
            working_copy_owner_id: "w1".to_string(),
            problems: vec![Problem {
                message: "unused".to_string(),
                id: 0,
                error: false,
                warning: true,
                source_start: 3,
                source_end: 4,
                source_line_number: 1,
                originating_file_name: "/proj/a.rs".to_string(),
                arguments: Vec::new(),
            }],
            highlighted_positions: vec![HighlightedPosition {
                offset: 0,
                length: 2,
                kind: "keyword".to_string(),
            }],
        };
        let value = serde_json::to_value(&result)?;
        assert_eq!(value["workingCopyOwnerID"], "w1");
        assert_eq!(value["problems"][0]["sourceLineNumber"], 1);
        assert_eq!(value["problems"][0]["originatingFileName"], "/proj/a.rs");
        assert_eq!(value["highlightedPositions"][0]["type"], "keyword");
        Ok(())
    }
}
