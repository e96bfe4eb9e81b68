// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! One shadow document and its delta sequencing.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{Delta, DeltaKind, OffsetEncoding};

/// Identity of a working copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkingCopyKey {
    /// Workspace path of the owning project.
    pub project_path: String,
    /// Workspace path of the file.
    pub file_path: String,
}

/// A delta that made it into the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDelta {
    /// Kind of the applied delta.
    pub kind: DeltaKind,
    /// Its sequence number, if it had one.
    pub seq: Option<u64>,
    /// Content right after it was applied.
    pub content: String,
}

/// Server-side shadow of one open file.
#[derive(Debug)]
pub struct WorkingCopy {
    key: WorkingCopyKey,
    content: String,
    last_applied_seq: Option<u64>,
    pending: BTreeMap<u64, Delta>,
    discarded: bool,
}

impl WorkingCopy {
    /// Creates a working copy holding `content`.
    #[must_use]
    pub const fn new(key: WorkingCopyKey, content: String) -> Self {
        Self {
            key,
            content,
            last_applied_seq: None,
            pending: BTreeMap::new(),
            discarded: false,
        }
    }

    /// Identity.
    #[must_use]
    pub const fn key(&self) -> &WorkingCopyKey {
        &self.key
    }

    /// Current content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Highest sequence number applied so far.
    #[must_use]
    pub const fn last_applied_seq(&self) -> Option<u64> {
        self.last_applied_seq
    }

    /// Deltas held for a missing predecessor.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the copy was removed from the store while a caller still held
    /// it.
    #[must_use]
    pub const fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub(crate) const fn mark_discarded(&mut self) {
        self.discarded = true;
    }

    pub(crate) fn rekey(&mut self, key: WorkingCopyKey) {
        self.key = key;
    }

    /// Replaces the content wholesale and forgets sequencing state.
    pub fn reset(&mut self, content: String) {
        self.content = content;
        self.reset_sequence();
    }

    /// Forgets the sequence baseline and buffered deltas, keeping the
    /// content. A newly attached editor numbers its deltas from 1 again.
    pub fn reset_sequence(&mut self) {
        self.last_applied_seq = None;
        self.pending.clear();
    }

    /// SHA-256 of the content, hex encoded.
    #[must_use]
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.content)
    }

    /// Applies `delta`, honoring its sequence number.
    ///
    /// Returns every delta that reached the content, in order: empty when
    /// `delta` was buffered, more than one when it unblocked buffered
    /// successors.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidDelta`] when the delta does not fit the content.
    /// - [`SyncError::StaleDelta`] when `seq` was already applied.
    /// - [`SyncError::SequenceGap`] when too many deltas are already waiting.
    pub fn apply(
        &mut self,
        delta: &Delta,
        seq: Option<u64>,
        encoding: OffsetEncoding,
        max_pending: usize,
    ) -> SyncResult<Vec<AppliedDelta>> {
        let Some(seq) = seq else {
            self.apply_now(delta, encoding)?;
            return Ok(vec![self.applied(delta.kind(), None)]);
        };

        match self.last_applied_seq {
            Some(last) if seq <= last => Err(SyncError::StaleDelta {
                path: self.key.file_path.clone(),
                seq,
                last,
            }),
            Some(last) if seq > last.saturating_add(1) && delta.kind() != DeltaKind::ReplaceAll => {
                if self.pending.len() >= max_pending {
                    return Err(SyncError::SequenceGap {
                        path: self.key.file_path.clone(),
                        expected: last + 1,
                        got: seq,
                    });
                }
                self.pending.insert(seq, delta.clone());
                Ok(Vec::new())
            }
            _ => {
                // In order, first sequenced delta, or a snapshot superseding a gap
                self.apply_now(delta, encoding)?;
                self.last_applied_seq = Some(seq);
                self.pending = self.pending.split_off(&seq.saturating_add(1));

                let mut applied = vec![self.applied(delta.kind(), Some(seq))];
                self.drain_pending(encoding, &mut applied);
                Ok(applied)
            }
        }
    }

    fn drain_pending(&mut self, encoding: OffsetEncoding, applied: &mut Vec<AppliedDelta>) {
        while let Some(last) = self.last_applied_seq
            && let Some(delta) = self.pending.remove(&(last + 1))
        {
            let seq = last + 1;
            self.last_applied_seq = Some(seq);
            match self.apply_now(&delta, encoding) {
                Ok(()) => applied.push(self.applied(delta.kind(), Some(seq))),
                Err(e) => warn!("Dropping buffered delta {}: {}", seq, e),
            }
        }
    }

    fn apply_now(&mut self, delta: &Delta, encoding: OffsetEncoding) -> SyncResult<()> {
        delta
            .apply(&mut self.content, encoding)
            .map_err(|reason| SyncError::invalid_delta(&self.key.file_path, reason))
    }

    fn applied(&self, kind: DeltaKind, seq: Option<u64>) -> AppliedDelta {
        AppliedDelta {
            kind,
            seq,
            content: self.content.clone(),
        }
    }
}

/// SHA-256 of `content`, hex encoded.
#[must_use]
pub fn sha256_hex(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENC: OffsetEncoding = OffsetEncoding::Utf16;

    fn copy(content: &str) -> WorkingCopy {
        WorkingCopy::new(
            WorkingCopyKey {
                project_path: "/p".to_string(),
                file_path: "/p/a.txt".to_string(),
            },
            content.to_string(),
        )
    }

    fn contents(applied: &[AppliedDelta]) -> Vec<&str> {
        applied.iter().map(|a| a.content.as_str()).collect()
    }

    #[test]
    fn test_unsequenced_applies_in_arrival_order() -> SyncResult<()> {
        let mut wc = copy("hello");
        let applied = wc.apply(&Delta::insert(5, " world"), None, ENC, 64)?;
        assert_eq!(contents(&applied), vec!["hello world"]);
        assert_eq!(wc.last_applied_seq(), None);
        Ok(())
    }

    #[test]
    fn test_invalid_delta_leaves_content() {
        let mut wc = copy("abc");
        let err = wc.apply(&Delta::remove(1, 10), None, ENC, 64);
        assert!(matches!(err, Err(SyncError::InvalidDelta { .. })));
        assert_eq!(wc.content(), "abc");
    }

    #[test]
    fn test_first_sequenced_delta_sets_baseline() -> SyncResult<()> {
        let mut wc = copy("");
        wc.apply(&Delta::insert(0, "a"), Some(41), ENC, 64)?;
        assert_eq!(wc.last_applied_seq(), Some(41));

        let stale = wc.apply(&Delta::insert(0, "b"), Some(41), ENC, 64);
        assert!(matches!(stale, Err(SyncError::StaleDelta { seq: 41, last: 41, .. })));
        assert_eq!(wc.content(), "a");
        Ok(())
    }

    #[test]
    fn test_gap_is_buffered_then_drained() -> SyncResult<()> {
        let mut wc = copy("");
        wc.apply(&Delta::insert(0, "a"), Some(1), ENC, 64)?;

        let held = wc.apply(&Delta::insert(2, "c"), Some(3), ENC, 64)?;
        assert!(held.is_empty());
        assert_eq!(wc.pending_len(), 1);

        let applied = wc.apply(&Delta::insert(1, "b"), Some(2), ENC, 64)?;
        assert_eq!(contents(&applied), vec!["ab", "abc"]);
        assert_eq!(wc.last_applied_seq(), Some(3));
        assert_eq!(wc.pending_len(), 0);
        Ok(())
    }

    #[test]
    fn test_gap_overflow_rejected() -> SyncResult<()> {
        let mut wc = copy("");
        wc.apply(&Delta::insert(0, "a"), Some(1), ENC, 2)?;
        wc.apply(&Delta::insert(0, "x"), Some(3), ENC, 2)?;
        wc.apply(&Delta::insert(0, "y"), Some(4), ENC, 2)?;

        let err = wc.apply(&Delta::insert(0, "z"), Some(5), ENC, 2);
        assert!(matches!(
            err,
            Err(SyncError::SequenceGap { expected: 2, got: 5, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_snapshot_supersedes_gap() -> SyncResult<()> {
        let mut wc = copy("old");
        wc.apply(&Delta::insert(0, "a"), Some(1), ENC, 64)?;
        wc.apply(&Delta::insert(0, "lost"), Some(3), ENC, 64)?;
        wc.apply(&Delta::insert(5, "!"), Some(6), ENC, 64)?;

        let applied = wc.apply(&Delta::replace_all("fresh"), Some(5), ENC, 64)?;
        assert_eq!(contents(&applied), vec!["fresh", "fresh!"]);
        assert_eq!(wc.last_applied_seq(), Some(6));
        assert_eq!(wc.pending_len(), 0);
        Ok(())
    }

    #[test]
    fn test_reset_sequence_keeps_content() -> SyncResult<()> {
        let mut wc = copy("abc");
        wc.apply(&Delta::insert(3, "x"), Some(1), ENC, 64)?;
        wc.apply(&Delta::insert(0, "later"), Some(4), ENC, 64)?;

        wc.reset_sequence();
        assert_eq!(wc.content(), "abcx");
        assert_eq!(wc.last_applied_seq(), None);
        assert_eq!(wc.pending_len(), 0);

        wc.apply(&Delta::insert(0, "N"), Some(1), ENC, 64)?;
        assert_eq!(wc.content(), "Nabcx");
        Ok(())
    }

    #[test]
    fn test_hash_and_reset() {
        let mut wc = copy("abc");
        assert_eq!(
            wc.content_hash(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        wc.reset("xyz".to_string());
        assert_eq!(wc.content(), "xyz");
        assert_eq!(wc.last_applied_seq(), None);
    }
}
