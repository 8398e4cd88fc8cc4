//! Packed per-token metadata.
//!
//! Layout of the `u32`, from the least significant bit:
//!
//! ```text
//! bbbb bbbb ffff ffff fFFF FBTT LLLL LLLL
//! L: language id (8 bits)
//! T: standard token type (2 bits)
//! B: balanced brackets (1 bit)
//! F: font style (4 bits)
//! f: foreground colour id (9 bits)
//! b: background colour id (8 bits)
//! ```
//!
//! Every field uses 0 as "not set", merging a 0 into existing metadata keeps the
//! existing value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use onig::Regex;
use serde::{Deserialize, Serialize};

use crate::themes::FontStyle;

const LANGUAGEID_MASK: u32 = 0b0000_0000_0000_0000_0000_0000_1111_1111;
const TOKEN_TYPE_MASK: u32 = 0b0000_0000_0000_0000_0000_0011_0000_0000;
const BALANCED_BRACKETS_MASK: u32 = 0b0000_0000_0000_0000_0000_0100_0000_0000;
const FONT_STYLE_MASK: u32 = 0b0000_0000_0000_0000_0111_1000_0000_0000;
const FOREGROUND_MASK: u32 = 0b0000_0000_1111_1111_1000_0000_0000_0000;
const BACKGROUND_MASK: u32 = 0b1111_1111_0000_0000_0000_0000_0000_0000;

/// Highest colour ids the packed fields can hold
pub(crate) const MAX_FOREGROUND_ID: u32 = FOREGROUND_MASK >> FOREGROUND_OFFSET;
pub(crate) const MAX_BACKGROUND_ID: u32 = BACKGROUND_MASK >> BACKGROUND_OFFSET;

const LANGUAGEID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const BALANCED_BRACKETS_OFFSET: u32 = 10;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 15;
const BACKGROUND_OFFSET: u32 = 24;

/// Coarse classification of a token, derived from its scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardTokenType {
    #[default]
    Other = 0,
    Comment = 1,
    String = 2,
    #[serde(rename = "regex")]
    RegEx = 3,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => StandardTokenType::Comment,
            2 => StandardTokenType::String,
            3 => StandardTokenType::RegEx,
            _ => StandardTokenType::Other,
        }
    }
}

/// Resolved style, language and token type of a token
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TokenMetadata(u32);

impl TokenMetadata {
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub fn language_id(self) -> u32 {
        (self.0 & LANGUAGEID_MASK) >> LANGUAGEID_OFFSET
    }

    pub fn token_type(self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    pub fn contains_balanced_brackets(self) -> bool {
        self.0 & BALANCED_BRACKETS_MASK != 0
    }

    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits_truncate(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    pub fn foreground(self) -> u32 {
        (self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET
    }

    pub fn background(self) -> u32 {
        (self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET
    }

    /// Returns a copy with the given fields replaced.
    /// A language id or colour of 0 and `None` values keep the current field, as do
    /// colour ids too large for their field.
    pub fn set(
        self,
        language_id: u32,
        token_type: Option<StandardTokenType>,
        balanced_brackets: Option<bool>,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) -> Self {
        let language_id = if language_id != 0 {
            language_id
        } else {
            self.language_id()
        };
        let token_type = token_type.unwrap_or_else(|| self.token_type());
        let balanced = balanced_brackets.unwrap_or_else(|| self.contains_balanced_brackets());
        let font_style = font_style.unwrap_or_else(|| self.font_style());
        let foreground = if foreground != 0 && foreground <= MAX_FOREGROUND_ID {
            foreground
        } else {
            self.foreground()
        };
        let background = if background != 0 && background <= MAX_BACKGROUND_ID {
            background
        } else {
            self.background()
        };

        Self(
            ((language_id << LANGUAGEID_OFFSET) & LANGUAGEID_MASK)
                | ((token_type as u32) << TOKEN_TYPE_OFFSET)
                | ((balanced as u32) << BALANCED_BRACKETS_OFFSET)
                | ((font_style.bits() as u32) << FONT_STYLE_OFFSET)
                | ((foreground << FOREGROUND_OFFSET) & FOREGROUND_MASK)
                | ((background << BACKGROUND_OFFSET) & BACKGROUND_MASK),
        )
    }
}

impl fmt::Debug for TokenMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMetadata")
            .field("language_id", &self.language_id())
            .field("token_type", &self.token_type())
            .field("balanced_brackets", &self.contains_balanced_brackets())
            .field("font_style", &self.font_style())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}

/// Language and token type of a single scope, independent of the theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BasicScopeAttributes {
    /// 0 when the scope doesn't belong to an embedded language
    pub(crate) language_id: u32,
    pub(crate) token_type: Option<StandardTokenType>,
}

static STANDARD_TOKEN_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(comment|string|regex|meta\.embedded)\b").expect("Invalid token type regex")
});

fn standard_token_type(scope: &str) -> Option<StandardTokenType> {
    let captures = STANDARD_TOKEN_TYPE_REGEX.captures(scope)?;
    match captures.at(1)? {
        "comment" => Some(StandardTokenType::Comment),
        "string" => Some(StandardTokenType::String),
        "regex" => Some(StandardTokenType::RegEx),
        _ => Some(StandardTokenType::Other),
    }
}

/// Computes and caches the [`BasicScopeAttributes`] of each scope name for a grammar
#[derive(Debug)]
pub(crate) struct BasicScopeAttributesProvider {
    default_attributes: BasicScopeAttributes,
    /// Scope prefixes to language ids, most specific prefixes first
    embedded_languages: Vec<(String, u32)>,
    cache: papaya::HashMap<String, BasicScopeAttributes>,
}

impl BasicScopeAttributesProvider {
    pub(crate) fn new(initial_language: u32, embedded_languages: &BTreeMap<String, u32>) -> Self {
        // Reverse lexicographic order puts `source.css.embedded` before `source.css`
        let embedded_languages = embedded_languages
            .iter()
            .rev()
            .map(|(scope, id)| (scope.clone(), *id))
            .collect();
        Self {
            default_attributes: BasicScopeAttributes {
                language_id: initial_language,
                token_type: None,
            },
            embedded_languages,
            cache: papaya::HashMap::new(),
        }
    }

    pub(crate) fn default_attributes(&self) -> BasicScopeAttributes {
        self.default_attributes
    }

    pub(crate) fn attributes(&self, scope: &str) -> BasicScopeAttributes {
        let cache = self.cache.pin();
        if let Some(attrs) = cache.get(scope) {
            return *attrs;
        }
        let attrs = BasicScopeAttributes {
            language_id: self.language_of(scope),
            token_type: standard_token_type(scope),
        };
        cache.insert(scope.to_string(), attrs);
        attrs
    }

    fn language_of(&self, scope: &str) -> u32 {
        self.embedded_languages
            .iter()
            .find(|(prefix, _)| crate::scope::is_scope_prefix(prefix, scope))
            .map(|(_, id)| *id)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_ids_past_the_field_width_are_ignored() {
        let base = TokenMetadata::default().set(0, None, None, None, 3, 4);
        let merged = base.set(0, None, None, None, MAX_FOREGROUND_ID + 1, MAX_BACKGROUND_ID + 1);
        assert_eq!(merged.foreground(), 3);
        assert_eq!(merged.background(), 4);

        let widest = base.set(0, None, None, None, MAX_FOREGROUND_ID, MAX_BACKGROUND_ID);
        assert_eq!(widest.foreground(), 511);
        assert_eq!(widest.background(), 255);
    }

    #[test]
    fn set_and_get_every_field() {
        let metadata = TokenMetadata::default().set(
            3,
            Some(StandardTokenType::RegEx),
            Some(true),
            Some(FontStyle::BOLD),
            511,
            255,
        );
        assert_eq!(metadata.language_id(), 3);
        assert_eq!(metadata.token_type(), StandardTokenType::RegEx);
        assert!(metadata.contains_balanced_brackets());
        assert_eq!(metadata.font_style(), FontStyle::BOLD);
        assert_eq!(metadata.foreground(), 511);
        assert_eq!(metadata.background(), 255);
    }

    #[test]
    fn unset_values_inherit() {
        let base = TokenMetadata::default().set(
            1,
            Some(StandardTokenType::String),
            Some(true),
            Some(FontStyle::ITALIC),
            10,
            2,
        );
        let merged = base.set(0, None, None, None, 0, 0);
        assert_eq!(merged, base);

        let merged = base.set(0, Some(StandardTokenType::Other), Some(false), None, 11, 0);
        assert_eq!(merged.language_id(), 1);
        assert_eq!(merged.token_type(), StandardTokenType::Other);
        assert!(!merged.contains_balanced_brackets());
        assert_eq!(merged.font_style(), FontStyle::ITALIC);
        assert_eq!(merged.foreground(), 11);
        assert_eq!(merged.background(), 2);

        // An explicit empty font style clears the inherited one
        let merged = base.set(0, None, None, Some(FontStyle::empty()), 0, 0);
        assert_eq!(merged.font_style(), FontStyle::empty());
    }

    #[test]
    fn can_get_standard_token_types() {
        let cases = vec![
            ("comment.line.double-slash", Some(StandardTokenType::Comment)),
            ("string.quoted.double", Some(StandardTokenType::String)),
            ("string.regexp", Some(StandardTokenType::String)),
            ("constant.regex.js", Some(StandardTokenType::RegEx)),
            ("meta.embedded.block.css", Some(StandardTokenType::Other)),
            ("keyword.control", None),
            ("commentary", None),
        ];
        for (scope, expected) in cases {
            assert_eq!(standard_token_type(scope), expected, "{scope}");
        }
    }

    #[test]
    fn embedded_languages_prefer_longest_prefix() {
        let mut languages = BTreeMap::new();
        languages.insert("source.css".to_string(), 2);
        languages.insert("source.css.embedded".to_string(), 3);
        languages.insert("source.js".to_string(), 4);
        let provider = BasicScopeAttributesProvider::new(1, &languages);

        assert_eq!(provider.default_attributes().language_id, 1);
        assert_eq!(provider.attributes("source.css").language_id, 2);
        assert_eq!(provider.attributes("source.css.embedded.html").language_id, 3);
        assert_eq!(provider.attributes("source.js.jsx").language_id, 4);
        assert_eq!(provider.attributes("source.jsx").language_id, 0);
        // cached
        assert_eq!(provider.attributes("source.css").language_id, 2);
    }
}
