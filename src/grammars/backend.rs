//! The regex engine behind pattern matching.
//!
//! The tokenizer only needs to compile a pattern and search it from a byte offset, so
//! the engine is hidden behind [`RegexBackend`]. Oniguruma is the default as grammars
//! are written for its syntax.

use std::fmt;
use std::sync::Arc;

use onig::{Region, RegexOptions, SearchOptions, Syntax};

/// Byte ranges of each capture group of a match, group 0 being the whole match.
/// Groups that did not participate are `None`.
pub type CaptureSpans = Vec<Option<(usize, usize)>>;

/// A compiled pattern
pub trait CompiledPattern: Send + Sync + fmt::Debug {
    /// Finds the first match starting at or after byte offset `from`.
    /// The whole text is given so lookbehinds can see before `from`.
    fn search(&self, text: &str, from: usize) -> Option<CaptureSpans>;
}

/// Compiles patterns. Picked once when building a [`Registry`](crate::Registry).
pub trait RegexBackend: Send + Sync + fmt::Debug {
    fn compile(&self, pattern: &str) -> Result<Arc<dyn CompiledPattern>, String>;
}

/// Oniguruma through the `onig` bindings
#[derive(Debug, Default, Clone, Copy)]
pub struct OnigBackend;

struct OnigPattern {
    source: String,
    regex: onig::Regex,
}

impl fmt::Debug for OnigPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnigPattern({})", self.source)
    }
}

impl CompiledPattern for OnigPattern {
    fn search(&self, text: &str, from: usize) -> Option<CaptureSpans> {
        if from > text.len() {
            return None;
        }
        let mut region = Region::new();
        self.regex.search_with_options(
            text,
            from,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        Some((0..region.len()).map(|i| region.pos(i)).collect())
    }
}

impl RegexBackend for OnigBackend {
    fn compile(&self, pattern: &str) -> Result<Arc<dyn CompiledPattern>, String> {
        let regex = onig::Regex::with_options(
            pattern,
            RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            Syntax::default(),
        )
        .map_err(|e| e.to_string())?;
        Ok(Arc::new(OnigPattern {
            source: pattern.to_string(),
            regex,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_returns_absolute_capture_spans() {
        let pattern = OnigBackend.compile(r"(a)|(b)").unwrap();
        let text = "xxbxa";
        assert_eq!(pattern.search(text, 0), Some(vec![Some((2, 3)), None, Some((2, 3))]));
        assert_eq!(pattern.search(text, 3), Some(vec![Some((4, 5)), Some((4, 5)), None]));
        assert_eq!(pattern.search(text, 5), None);
        assert_eq!(pattern.search(text, 50), None);
    }

    #[test]
    fn lookbehind_sees_before_start() {
        let pattern = OnigBackend.compile(r"(?<=a)b").unwrap();
        assert_eq!(pattern.search("ab", 1), Some(vec![Some((1, 2))]));
    }

    #[test]
    fn invalid_patterns_are_errors() {
        assert!(OnigBackend.compile("(unclosed").is_err());
    }
}
