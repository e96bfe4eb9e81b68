// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Deltas and the text-patching algorithm.
pub mod delta;
/// JSON-RPC envelopes, line and `Content-Length` framing.
pub mod rpc;
/// Offset encodings and line indexing.
pub mod text;
/// Wire payloads and method names.
pub mod wire;

pub use delta::{Delta, DeltaKind};
pub use text::{LineIndex, OffsetEncoding};
pub use wire::{
    ChangeTarget, EditorChanges, FileOperation, FileOperationKind, HighlightedPosition, Problem,
    ProjectRemoved, ReconcileParams, ReconcileStateChanged,
};
