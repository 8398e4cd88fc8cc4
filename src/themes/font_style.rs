use serde::{Deserialize, Serialize};

/// Font style bits as stored in [`TokenMetadata`](crate::TokenMetadata).
///
/// "Not set" is represented as `Option<FontStyle>::None` everywhere, an empty
/// `FontStyle` means explicitly no style.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug,
)]
pub struct FontStyle {
    bits: u8,
}

impl FontStyle {
    /// Italic font style
    pub const ITALIC: Self = Self { bits: 1 };
    /// Bold font style
    pub const BOLD: Self = Self { bits: 2 };
    /// Underline font style
    pub const UNDERLINE: Self = Self { bits: 4 };
    /// Strikethrough font style
    pub const STRIKETHROUGH: Self = Self { bits: 8 };

    /// Returns an empty set of flags
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn bits(self) -> u8 {
        self.bits
    }

    /// Only the 4 lower bits are kept
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self { bits: bits & 0b1111 }
    }

    /// Returns `true` if no flags are currently stored
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns `true` if all of the flags in `other` are contained within `self`
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Parses a theme `fontStyle` string like `"italic bold"`.
    /// Unknown words are ignored, an empty string is a valid explicit "no style".
    pub fn from_str(font_style_str: &str) -> Self {
        let mut font_style = Self::empty();
        for word in font_style_str.split(' ') {
            match word {
                "italic" => font_style.insert(FontStyle::ITALIC),
                "bold" => font_style.insert(FontStyle::BOLD),
                "underline" => font_style.insert(FontStyle::UNDERLINE),
                "strikethrough" => font_style.insert(FontStyle::STRIKETHROUGH),
                _ => (),
            }
        }
        font_style
    }

    /// Inserts the specified flags in-place
    pub fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_font_styles() {
        assert_eq!(FontStyle::from_str(""), FontStyle::empty());
        assert_eq!(FontStyle::from_str("italic").bits(), 1);
        assert_eq!(FontStyle::from_str("bold underline").bits(), 6);
        assert_eq!(FontStyle::from_str("strikethrough bold").bits(), 10);
        // no partial words
        assert_eq!(FontStyle::from_str("bolder"), FontStyle::empty());
    }
}
