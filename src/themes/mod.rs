mod color;
mod compiled;
mod font_style;
mod raw;
mod selector;
mod trie;

pub use color::{Color, ColorMap};
pub use compiled::{StyleAttributes, Theme};
pub(crate) use compiled::ThemeProvider;
pub use font_style::FontStyle;
pub use raw::{Colors, RawTheme, RawThemeSetting, RawThemeSettings};
pub use selector::{Parent, ParsedThemeRule, parse_selector, parse_theme};
