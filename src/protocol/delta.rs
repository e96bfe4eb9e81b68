// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Atomic text mutations and the patching algorithm.
//!
//! A [`Delta`] only makes sense against the document state immediately before
//! it. Deltas are neither idempotent nor commutative, so every consumer must
//! apply them in arrival order.

use serde::{Deserialize, Serialize};

use super::text::OffsetEncoding;

/// Wire name of a delta kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaKind {
    /// Text spliced in at an offset.
    Insert,
    /// A run of characters deleted at an offset.
    Remove,
    /// The whole document replaced.
    ReplaceAll,
}

impl DeltaKind {
    /// Wire spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Remove => "REMOVE",
            Self::ReplaceAll => "REPLACE_ALL",
        }
    }
}

/// One atomic text mutation. Offsets and lengths are counted in the
/// session's [`OffsetEncoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Splice `text` in at `offset`.
    Insert {
        /// Insertion point.
        offset: usize,
        /// Inserted text, never empty.
        text: String,
    },
    /// Delete `length` units starting at `offset`.
    Remove {
        /// First removed unit.
        offset: usize,
        /// Number of removed units, always positive.
        length: usize,
    },
    /// Replace the entire content with `text`.
    ReplaceAll {
        /// The new document content.
        text: String,
    },
}

impl Delta {
    /// Builds an insert.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::Insert {
            offset,
            text: text.into(),
        }
    }

    /// Builds a removal.
    #[must_use]
    pub const fn remove(offset: usize, length: usize) -> Self {
        Self::Remove { offset, length }
    }

    /// Builds a full replacement.
    pub fn replace_all(text: impl Into<String>) -> Self {
        Self::ReplaceAll { text: text.into() }
    }

    /// The delta's kind.
    #[must_use]
    pub const fn kind(&self) -> DeltaKind {
        match self {
            Self::Insert { .. } => DeltaKind::Insert,
            Self::Remove { .. } => DeltaKind::Remove,
            Self::ReplaceAll { .. } => DeltaKind::ReplaceAll,
        }
    }

    /// Offset the delta applies at (`0` for a full replacement).
    #[must_use]
    pub const fn offset(&self) -> usize {
        match self {
            Self::Insert { offset, .. } | Self::Remove { offset, .. } => *offset,
            Self::ReplaceAll { .. } => 0,
        }
    }

    /// Checks the per-kind shape rules.
    ///
    /// # Errors
    ///
    /// Returns the reason when an insert carries no text or a removal has a
    /// zero length.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Insert { text, .. } if text.is_empty() => {
                Err("insert carries no text".to_string())
            }
            Self::Remove { length: 0, .. } => Err("remove of zero characters".to_string()),
            _ => Ok(()),
        }
    }

    /// Applies the delta to `content` in place.
    ///
    /// The content is left untouched on error; there is no partial
    /// application.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when the delta is malformed, its range
    /// exceeds the current content, or a boundary falls inside a character.
    pub fn apply(&self, content: &mut String, encoding: OffsetEncoding) -> Result<(), String> {
        self.validate()?;

        match self {
            Self::Insert { offset, text } => {
                let at = resolve(content, *offset, encoding)?;
                content.insert_str(at, text);
            }
            Self::Remove { offset, length } => {
                let end = offset.checked_add(*length).ok_or_else(|| {
                    format!("remove range {offset}+{length} overflows")
                })?;
                let start_byte = resolve(content, *offset, encoding)?;
                let end_byte = resolve(content, end, encoding)?;
                content.replace_range(start_byte..end_byte, "");
            }
            Self::ReplaceAll { text } => {
                content.clone_from(text);
            }
        }
        Ok(())
    }
}

/// Maps an offset to a byte index with a descriptive rejection.
fn resolve(content: &str, offset: usize, encoding: OffsetEncoding) -> Result<usize, String> {
    encoding.byte_index(content, offset).ok_or_else(|| {
        let len = encoding.len(content);
        if offset > len {
            format!("offset {offset} beyond content length {len}")
        } else {
            format!("offset {offset} splits a character")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(initial: &str, deltas: &[Delta]) -> Result<String, String> {
        let mut content = initial.to_string();
        for delta in deltas {
            delta.apply(&mut content, OffsetEncoding::Utf16)?;
        }
        Ok(content)
    }

    #[test]
    fn test_hello_world_sequence() -> Result<(), String> {
        let mut content = "hello".to_string();

        Delta::insert(5, " world").apply(&mut content, OffsetEncoding::Utf16)?;
        assert_eq!(content, "hello world");

        Delta::remove(0, 6).apply(&mut content, OffsetEncoding::Utf16)?;
        assert_eq!(content, "world");

        Delta::replace_all("done").apply(&mut content, OffsetEncoding::Utf16)?;
        assert_eq!(content, "done");
        Ok(())
    }

    #[test]
    fn test_remove_out_of_bounds_leaves_content() {
        let mut content = "abc".to_string();
        let result = Delta::remove(1, 10).apply(&mut content, OffsetEncoding::Utf16);
        assert!(result.is_err());
        assert_eq!(content, "abc");
    }

    #[test]
    fn test_insert_past_end_rejected() {
        let mut content = "abc".to_string();
        let err = Delta::insert(4, "x")
            .apply(&mut content, OffsetEncoding::Utf16)
            .err();
        assert_eq!(err.as_deref(), Some("offset 4 beyond content length 3"));
        assert_eq!(content, "abc");
    }

    #[test]
    fn test_shape_rules() {
        assert!(Delta::insert(0, "").validate().is_err());
        assert!(Delta::remove(0, 0).validate().is_err());
        assert!(Delta::replace_all("").validate().is_ok());
    }

    #[test]
    fn test_remove_inside_surrogate_pair_rejected() {
        let mut content = "a\u{1F600}b".to_string();
        let result = Delta::remove(2, 1).apply(&mut content, OffsetEncoding::Utf16);
        assert_eq!(result.err().as_deref(), Some("offset 2 splits a character"));
        assert_eq!(content, "a\u{1F600}b");
    }

    #[test]
    fn test_utf16_offsets_after_astral_character() -> Result<(), String> {
        let content = apply_all(
            "\u{1F600}ab",
            &[Delta::remove(2, 1), Delta::insert(3, "c")],
        )?;
        assert_eq!(content, "\u{1F600}bc");
        Ok(())
    }

    #[test]
    fn test_deltas_do_not_commute() -> Result<(), String> {
        let d1 = Delta::insert(0, "x");
        let d2 = Delta::remove(0, 1);

        let forward = apply_all("ab", &[d1.clone(), d2.clone()])?;
        let backward = apply_all("ab", &[d2, d1])?;
        assert_eq!(forward, "ab");
        assert_eq!(backward, "xb");
        assert_ne!(forward, backward);
        Ok(())
    }

    #[test]
    fn test_kind_wire_names() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&DeltaKind::ReplaceAll)?, "\"REPLACE_ALL\"");
        assert_eq!(DeltaKind::Insert.as_str(), "INSERT");
        assert_eq!(Delta::replace_all("x").offset(), 0);
        Ok(())
    }
}
