use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::OcraResult;
use crate::metadata::{MAX_BACKGROUND_ID, MAX_FOREGROUND_ID};
use crate::themes::FontStyle;
use crate::themes::color::ColorMap;
use crate::themes::raw::RawTheme;
use crate::themes::selector::{
    ParsedThemeRule, cmp_parent_scopes, matches_parent_scopes, parse_theme,
};
use crate::themes::trie::{ThemeTrieElement, ThemeTrieRule};

const DEFAULT_FOREGROUND: &str = "#000000";
const DEFAULT_BACKGROUND: &str = "#FFFFFF";

/// The style a theme gives to a scope path. Colours are ids in the theme [`ColorMap`],
/// 0 meaning not set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StyleAttributes {
    pub font_style: Option<FontStyle>,
    pub foreground_id: u32,
    pub background_id: u32,
}

/// A theme ready to be matched against scope paths
pub struct Theme {
    name: Option<String>,
    color_map: ColorMap,
    defaults: StyleAttributes,
    root: ThemeTrieElement,
    /// Trie lookups per scope name
    cache: papaya::HashMap<String, Arc<[ThemeTrieRule]>>,
}

impl Theme {
    pub fn from_raw(raw: &RawTheme) -> Self {
        let mut theme = Self::from_parsed_rules(parse_theme(&raw.rules()));
        theme.name = raw.name.clone();
        theme
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let raw = RawTheme::load_from_file(path)?;
        Ok(Self::from_raw(&raw))
    }

    pub(crate) fn from_parsed_rules(mut rules: Vec<ParsedThemeRule>) -> Self {
        rules.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then_with(|| {
                    cmp_parent_scopes(a.parent_scopes.as_deref(), b.parent_scopes.as_deref())
                })
                .then_with(|| a.index.cmp(&b.index))
        });

        // Rules without scope come first after sorting and set the defaults
        let mut default_font_style = FontStyle::empty();
        let mut default_foreground = DEFAULT_FOREGROUND.to_string();
        let mut default_background = DEFAULT_BACKGROUND.to_string();
        let defaults_len = rules.iter().take_while(|r| r.scope.is_empty()).count();
        for rule in rules.drain(..defaults_len) {
            if let Some(font_style) = rule.font_style {
                default_font_style = font_style;
            }
            if let Some(fg) = rule.foreground {
                default_foreground = fg;
            }
            if let Some(bg) = rule.background {
                default_background = bg;
            }
        }

        let mut color_map = ColorMap::new();
        let defaults = StyleAttributes {
            font_style: Some(default_font_style),
            foreground_id: color_map.get_id(Some(&default_foreground)),
            background_id: color_map.get_id(Some(&default_background)),
        };

        let mut root = ThemeTrieElement::new(ThemeTrieRule {
            scope_depth: 0,
            parent_scopes: None,
            font_style: None,
            foreground: 0,
            background: 0,
        });
        for rule in &rules {
            let foreground = color_map.get_id(rule.foreground.as_deref());
            let background = color_map.get_id(rule.background.as_deref());
            root.insert(
                0,
                &rule.scope,
                rule.parent_scopes.as_deref(),
                rule.font_style,
                foreground,
                background,
            );
        }

        let colors = color_map.colors().len() - 1;
        if colors > MAX_BACKGROUND_ID as usize {
            log::warn!(
                "Theme uses {colors} colours: only the first {MAX_FOREGROUND_ID} can be foregrounds \
                 and the first {MAX_BACKGROUND_ID} backgrounds, the others are ignored"
            );
        }

        Self {
            name: None,
            color_map,
            defaults,
            root,
            cache: papaya::HashMap::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn defaults(&self) -> StyleAttributes {
        self.defaults
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// Finds the style for `scope` nested in `ancestors` (innermost first).
    ///
    /// The first rule, by specificity, whose parent requirements are satisfied wins.
    /// Returns `None` if no rule matches, which only happens if every rule for that
    /// scope requires parents.
    pub fn match_scope<'a, I>(&self, scope: &str, ancestors: I) -> Option<StyleAttributes>
    where
        I: Iterator<Item = &'a str> + Clone,
    {
        let cache = self.cache.pin();
        let rules = match cache.get(scope) {
            Some(rules) => rules.clone(),
            None => {
                let rules: Arc<[ThemeTrieRule]> = self.root.find(scope).into();
                cache.insert(scope.to_string(), rules.clone());
                rules
            }
        };

        rules
            .iter()
            .find(|rule| match &rule.parent_scopes {
                None => true,
                Some(parents) => matches_parent_scopes(ancestors.clone(), parents),
            })
            .map(|rule| StyleAttributes {
                font_style: rule.font_style,
                foreground_id: rule.foreground,
                background_id: rule.background,
            })
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::from_parsed_rules(Vec::new())
    }
}

impl fmt::Debug for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Theme")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .field("colors", &self.color_map.colors())
            .finish()
    }
}

/// The current theme, shared by a registry and all the grammars it loaded
#[derive(Debug, Default)]
pub(crate) struct ThemeProvider {
    current: RwLock<Arc<Theme>>,
}

impl ThemeProvider {
    pub(crate) fn current(&self) -> Arc<Theme> {
        match self.current.read() {
            Ok(theme) => theme.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set(&self, theme: Theme) {
        let theme = Arc::new(theme);
        match self.current.write() {
            Ok(mut current) => *current = theme,
            Err(poisoned) => *poisoned.into_inner() = theme,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(json: &str) -> Theme {
        Theme::from_raw(&RawTheme::from_json(json).unwrap())
    }

    fn fg<'a>(theme: &'a Theme, path: &[&str]) -> Option<&'a str> {
        let (scope, parents) = path.split_last().unwrap();
        theme
            .match_scope(scope, parents.iter().rev().copied())
            .and_then(|style| theme.color_map().color(style.foreground_id))
    }

    #[test]
    fn defaults_without_default_rule() {
        let theme = theme(r#"{"settings": []}"#);
        let defaults = theme.defaults();
        assert_eq!(defaults.font_style, Some(FontStyle::empty()));
        assert_eq!(theme.color_map().color(defaults.foreground_id), Some("#000000"));
        assert_eq!(theme.color_map().color(defaults.background_id), Some("#FFFFFF"));
    }

    #[test]
    fn more_specific_rule_wins() {
        let theme = theme(
            r##"{"tokenColors": [
                {"settings": {"foreground": "#F8F8F2", "background": "#272822"}},
                {"scope": "string", "settings": {"foreground": "#E6DB74"}},
                {"scope": "source.x string.quoted", "settings": {"foreground": "#AE81FF"}}
            ]}"##,
        );
        assert_eq!(fg(&theme, &["source.x", "string.quoted"]), Some("#AE81FF"));
        assert_eq!(fg(&theme, &["source.y", "string.quoted"]), Some("#E6DB74"));
        assert_eq!(fg(&theme, &["source.x", "string"]), Some("#E6DB74"));
        // Nothing set
        assert_eq!(fg(&theme, &["source.x", "keyword"]), None);
    }

    #[test]
    fn later_rules_override_earlier_ones() {
        let theme = theme(
            r##"{"settings": [
                {"scope": "comment", "settings": {"foreground": "#111111", "fontStyle": "italic"}},
                {"scope": "comment", "settings": {"foreground": "#222222"}}
            ]}"##,
        );
        let style = theme.match_scope("comment.line", std::iter::empty()).unwrap();
        assert_eq!(theme.color_map().color(style.foreground_id), Some("#222222"));
        assert_eq!(style.font_style, Some(FontStyle::ITALIC));
    }

    #[test]
    fn direct_parent_selectors() {
        let theme = theme(
            r##"{"settings": [
                {"scope": "meta.block > string", "settings": {"foreground": "#111111"}}
            ]}"##,
        );
        assert_eq!(fg(&theme, &["source", "meta.block", "string"]), Some("#111111"));
        assert_eq!(fg(&theme, &["meta.block", "meta.other", "string"]), None);
    }

    #[test]
    fn theme_provider_swaps_themes() {
        let provider = ThemeProvider::default();
        let old = provider.current();
        provider.set(theme(r##"{"name": "new", "settings": []}"##));
        assert_eq!(old.name(), None);
        assert_eq!(provider.current().name(), Some("new"));
    }
}
