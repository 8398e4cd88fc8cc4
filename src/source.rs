//! One line of text as seen by the regex engine.
//!
//! The regex engine works on UTF-8 byte offsets while callers expect character
//! offsets. ASCII lines map one to one; for everything else a table of character
//! start offsets is built the first time a conversion is asked for.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

pub struct SourceLine {
    /// Unique per instance, used to know whether a cached regex result is about this text
    id: u64,
    text: String,
    is_ascii: bool,
    /// Byte offset of the start of each character
    char_starts: OnceLock<Vec<usize>>,
}

impl SourceLine {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            is_ascii: text.is_ascii(),
            text,
            char_starts: OnceLock::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        if self.is_ascii {
            self.text.len()
        } else {
            self.char_starts().len()
        }
    }

    fn char_starts(&self) -> &[usize] {
        self.char_starts
            .get_or_init(|| self.text.char_indices().map(|(i, _)| i).collect())
    }

    /// Converts a character index to the byte offset where that character starts.
    /// Anything past the last character maps to the byte length.
    pub fn char_to_byte(&self, char_index: usize) -> usize {
        if self.is_ascii {
            return char_index.min(self.text.len());
        }
        self.char_starts()
            .get(char_index)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Converts a byte offset to the index of the character containing it.
    /// Anything at or past the byte length maps to the character count.
    pub fn byte_to_char(&self, byte_index: usize) -> usize {
        if self.is_ascii {
            return byte_index.min(self.text.len());
        }
        let starts = self.char_starts();
        if byte_index >= self.text.len() {
            return starts.len();
        }
        // starts[0] is always 0 so this is never 0 here
        starts.partition_point(|&start| start <= byte_index) - 1
    }
}

impl fmt::Debug for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLine")
            .field("id", &self.id)
            .field("text", &self.text)
            .finish()
    }
}
