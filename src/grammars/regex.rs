use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::grammars::backend::{CompiledPattern, RegexBackend};
use crate::tokenizer::anchors::AnchorActive;

/// What we learn from a single pass over the pattern source
#[derive(Debug, Default, Clone, Copy)]
struct SourceInfo {
    has_a_anchor: bool,
    has_g_anchor: bool,
    has_backreferences: bool,
}

/// Rewrites `\z` as `$(?!\n)(?<!\n)`: lines are matched with a trailing `\n` that
/// `\z` should not see.
fn normalize_source(pattern: &str) -> (String, SourceInfo) {
    let mut info = SourceInfo::default();
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('z') => out.push_str("$(?!\\n)(?<!\\n)"),
            Some(next) => {
                match next {
                    'A' => info.has_a_anchor = true,
                    'G' => info.has_g_anchor = true,
                    '1'..='9' => info.has_backreferences = true,
                    _ => (),
                }
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }

    (out, info)
}

/// A pattern of a grammar, compiled lazily for each anchor flavour it needs
pub struct Regex {
    source: String,
    info: SourceInfo,
    /// Indexed by [`AnchorActive::index`]. `None` if it failed to compile.
    compiled: [OnceLock<Option<Arc<dyn CompiledPattern>>>; 4],
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Create a new regex with the same pattern but fresh lazy compilation
        Regex {
            source: self.source.clone(),
            info: self.info,
            compiled: Default::default(),
        }
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Regex {
    pub fn new(pattern: &str) -> Self {
        let (source, info) = normalize_source(pattern);
        Self {
            source,
            info,
            compiled: Default::default(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_backreferences(&self) -> bool {
        self.info.has_backreferences
    }

    /// Patterns using `\G` depend on where the previous match ended so their
    /// results can't be reused from a search at another position.
    pub fn has_g_anchor(&self) -> bool {
        self.info.has_g_anchor
    }

    fn has_anchors(&self) -> bool {
        self.info.has_a_anchor || self.info.has_g_anchor
    }

    /// Checks that the pattern compiles as written
    pub fn validate(&self, backend: &dyn RegexBackend) -> Result<(), String> {
        let compiled = backend.compile(&self.source)?;
        let _ = self.compiled[AnchorActive::AG.index()].set(Some(compiled));
        Ok(())
    }

    /// The compiled pattern for that anchor flavour, `None` if it doesn't compile
    pub fn compiled(
        &self,
        backend: &dyn RegexBackend,
        anchor: AnchorActive,
    ) -> Option<Arc<dyn CompiledPattern>> {
        // Without anchors all the flavours are the same regex
        let anchor = if self.has_anchors() {
            anchor
        } else {
            AnchorActive::AG
        };
        self.compiled[anchor.index()]
            .get_or_init(|| {
                let pattern = anchor.replace_anchors(&self.source);
                match backend.compile(&pattern) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        log::warn!("Failed to compile regex {:?}: {e}", self.source);
                        None
                    }
                }
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::backend::OnigBackend;

    #[test]
    fn rewrites_end_of_string_anchor() {
        let re = Regex::new(r"foo\z|\\z");
        assert_eq!(re.source(), r"foo$(?!\n)(?<!\n)|\\z");

        let compiled = re.compiled(&OnigBackend, AnchorActive::None).unwrap();
        assert!(compiled.search("foo\n", 0).is_none());
        assert!(compiled.search("foo", 0).is_some());
    }

    #[test]
    fn detects_backreferences_and_anchors() {
        assert!(Regex::new(r"\1").has_backreferences());
        assert!(!Regex::new(r"\\1").has_backreferences());
        assert!(!Regex::new(r"\d").has_backreferences());
        assert!(Regex::new(r"\G\s").has_g_anchor());
        assert!(!Regex::new(r"\\G").has_g_anchor());
    }

    #[test]
    fn g_anchor_only_matches_when_active() {
        let re = Regex::new(r"\Gb");
        let active = re.compiled(&OnigBackend, AnchorActive::G).unwrap();
        let inactive = re.compiled(&OnigBackend, AnchorActive::None).unwrap();
        assert_eq!(active.search("ab", 1), Some(vec![Some((1, 2))]));
        assert_eq!(inactive.search("ab", 1), None);
    }

    #[test]
    fn invalid_regex_fails_validation() {
        let re = Regex::new("[a-");
        assert!(re.validate(&OnigBackend).is_err());
        assert!(re.compiled(&OnigBackend, AnchorActive::AG).is_none());
    }
}
