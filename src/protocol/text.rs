// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Offset units and line lookup.
//!
//! Editors count offsets in whatever unit their string type uses. Browser
//! editors count UTF-16 code units, so that is the default; Rust strings are
//! UTF-8, so every wire offset is converted to a byte index before touching
//! content.

use serde::{Deserialize, Serialize};

/// Unit in which wire offsets and lengths are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetEncoding {
    /// Bytes of UTF-8.
    #[serde(rename = "utf-8")]
    Utf8,
    /// UTF-16 code units.
    #[default]
    #[serde(rename = "utf-16")]
    Utf16,
    /// Unicode scalar values.
    #[serde(rename = "utf-32")]
    Utf32,
}

impl OffsetEncoding {
    /// Length of `text` in this encoding's units.
    #[must_use]
    pub fn len(self, text: &str) -> usize {
        match self {
            Self::Utf8 => text.len(),
            Self::Utf16 => text.encode_utf16().count(),
            Self::Utf32 => text.chars().count(),
        }
    }

    /// Converts an offset in this encoding into a byte index into `text`.
    ///
    /// Returns `None` when the offset is past the end or lands inside a
    /// character (a UTF-8 continuation byte or the second half of a
    /// surrogate pair).
    #[must_use]
    pub fn byte_index(self, text: &str, offset: usize) -> Option<usize> {
        match self {
            Self::Utf8 => (offset <= text.len() && text.is_char_boundary(offset)).then_some(offset),
            Self::Utf16 => {
                let mut units = 0;
                for (idx, ch) in text.char_indices() {
                    if units == offset {
                        return Some(idx);
                    }
                    if units > offset {
                        return None;
                    }
                    units += ch.len_utf16();
                }
                (units == offset).then_some(text.len())
            }
            Self::Utf32 => {
                if offset == 0 {
                    return Some(0);
                }
                let mut chars = text.char_indices();
                match chars.nth(offset) {
                    Some((idx, _)) => Some(idx),
                    None => (text.chars().count() == offset).then_some(text.len()),
                }
            }
        }
    }

    /// Human-readable name, as written in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16 => "utf-16",
            Self::Utf32 => "utf-32",
        }
    }

    /// Parses a configuration name, case-insensitively and with or without
    /// the dash.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16" | "utf16" => Some(Self::Utf16),
            "utf-32" | "utf32" => Some(Self::Utf32),
            _ => None,
        }
    }
}

/// Line start table over a text snapshot.
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    /// Indexes `text`. Lines are split on `\n`; a preceding `\r` stays part of
    /// the line it ends.
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { text, line_starts }
    }

    /// Number of lines (an empty text has one line).
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Zero-based line containing the byte index.
    #[must_use]
    pub fn line_of_byte(&self, byte: usize) -> usize {
        match self.line_starts.binary_search(&byte) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    /// Byte index of a `(line, character)` position.
    ///
    /// A character past the end of the line clamps to the line end, as the
    /// LSP specification requires. A line past the end clamps to the end of
    /// the text.
    #[must_use]
    pub fn byte_of_position(&self, line: u32, character: u32, encoding: OffsetEncoding) -> usize {
        let line = line as usize;
        let Some(&start) = self.line_starts.get(line) else {
            return self.text.len();
        };
        let end = self
            .line_starts
            .get(line + 1)
            .map_or(self.text.len(), |next| next - 1);
        let line_text = &self.text[start..end];

        let mut column = character as usize;
        loop {
            if let Some(idx) = encoding.byte_index(line_text, column) {
                return start + idx;
            }
            if column >= encoding.len(line_text) {
                return end;
            }
            // Inside a character: snap back to its start.
            column -= 1;
        }
    }

    /// Converts a byte index into an offset in `encoding` units.
    #[must_use]
    pub fn offset_of_byte(&self, byte: usize, encoding: OffsetEncoding) -> usize {
        let byte = byte.min(self.text.len());
        encoding.len(&self.text[..byte])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_counts_surrogate_pairs() {
        let text = "a\u{1F600}b";
        assert_eq!(OffsetEncoding::Utf16.len(text), 4);
        assert_eq!(OffsetEncoding::Utf8.len(text), 6);
        assert_eq!(OffsetEncoding::Utf32.len(text), 3);
    }

    #[test]
    fn test_utf16_byte_index() {
        let text = "a\u{1F600}b";
        assert_eq!(OffsetEncoding::Utf16.byte_index(text, 0), Some(0));
        assert_eq!(OffsetEncoding::Utf16.byte_index(text, 1), Some(1));
        // Second half of the surrogate pair
        assert_eq!(OffsetEncoding::Utf16.byte_index(text, 2), None);
        assert_eq!(OffsetEncoding::Utf16.byte_index(text, 3), Some(5));
        assert_eq!(OffsetEncoding::Utf16.byte_index(text, 4), Some(6));
        assert_eq!(OffsetEncoding::Utf16.byte_index(text, 5), None);
    }

    #[test]
    fn test_utf8_rejects_continuation_bytes() {
        let text = "h\u{e9}llo";
        assert_eq!(OffsetEncoding::Utf8.byte_index(text, 1), Some(1));
        assert_eq!(OffsetEncoding::Utf8.byte_index(text, 2), None);
        assert_eq!(OffsetEncoding::Utf8.byte_index(text, 3), Some(3));
        assert_eq!(OffsetEncoding::Utf8.byte_index(text, 7), None);
    }

    #[test]
    fn test_utf32_byte_index() {
        let text = "\u{e9}t\u{e9}";
        assert_eq!(OffsetEncoding::Utf32.byte_index(text, 0), Some(0));
        assert_eq!(OffsetEncoding::Utf32.byte_index(text, 1), Some(2));
        assert_eq!(OffsetEncoding::Utf32.byte_index(text, 3), Some(5));
        assert_eq!(OffsetEncoding::Utf32.byte_index(text, 4), None);
        assert_eq!(OffsetEncoding::Utf32.byte_index("", 0), Some(0));
    }

    #[test]
    fn test_encoding_deserializes_from_config_names() -> anyhow::Result<()> {
        let enc: OffsetEncoding = serde_json::from_str("\"utf-32\"")?;
        assert_eq!(enc, OffsetEncoding::Utf32);
        assert_eq!(OffsetEncoding::default().as_str(), "utf-16");
        Ok(())
    }

    #[test]
    fn test_line_index_positions() {
        let text = "fn main() {\n    let x = 1;\n}\n";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_of_byte(0), 0);
        assert_eq!(index.line_of_byte(12), 1);
        assert_eq!(index.line_of_byte(11), 0);

        let byte = index.byte_of_position(1, 8, OffsetEncoding::Utf16);
        assert_eq!(&text[byte..byte + 1], "x");

        // Past end of line clamps to the newline
        assert_eq!(index.byte_of_position(0, 99, OffsetEncoding::Utf16), 11);
        // Past end of text clamps to the end
        assert_eq!(index.byte_of_position(42, 0, OffsetEncoding::Utf16), text.len());
    }

    #[test]
    fn test_line_index_snaps_inside_character() {
        let text = "\u{1F600}x";
        let index = LineIndex::new(text);
        assert_eq!(index.byte_of_position(0, 1, OffsetEncoding::Utf16), 0);
        assert_eq!(index.offset_of_byte(4, OffsetEncoding::Utf16), 2);
    }
}
