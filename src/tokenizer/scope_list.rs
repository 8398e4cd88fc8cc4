use std::fmt;
use std::sync::Arc;

use crate::metadata::{BasicScopeAttributesProvider, TokenMetadata};
use crate::scope::Scope;
use crate::themes::{StyleAttributes, Theme};

/// What's needed to compute the metadata of a scope: its language and token type
/// from the grammar configuration, its style from the theme.
#[derive(Clone, Copy)]
pub(crate) struct ScopeAttributes<'a> {
    pub(crate) basic: &'a BasicScopeAttributesProvider,
    pub(crate) theme: &'a Theme,
}

impl ScopeAttributes<'_> {
    /// Metadata of the root of every line before the grammar scope is pushed
    pub(crate) fn default_metadata(&self) -> TokenMetadata {
        let basic = self.basic.default_attributes();
        let style = self.theme.defaults();
        TokenMetadata::default().set(
            basic.language_id,
            basic.token_type,
            None,
            style.font_style,
            style.foreground_id,
            style.background_id,
        )
    }

    fn merge(&self, existing: TokenMetadata, scope: &str, style: Option<StyleAttributes>) -> TokenMetadata {
        let basic = self.basic.attributes(scope);
        let (font_style, foreground, background) = match style {
            Some(style) => (style.font_style, style.foreground_id, style.background_id),
            None => (None, 0, 0),
        };
        existing.set(
            basic.language_id,
            basic.token_type,
            None,
            font_style,
            foreground,
            background,
        )
    }
}

/// An immutable list of scopes, each with the metadata resolved for the path up to it.
///
/// Lists are shared: pushing a scope only allocates the new element.
pub struct ScopeListElement {
    parent: Option<Arc<ScopeListElement>>,
    scope: Scope,
    metadata: TokenMetadata,
}

/// Scopes from the innermost to the outermost
#[derive(Clone)]
pub(crate) struct Ancestors<'a> {
    next: Option<&'a ScopeListElement>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.as_deref();
        Some(current.scope.as_str())
    }
}

impl ScopeListElement {
    /// The root of a line: the grammar scope merged into the default metadata
    pub(crate) fn root(scope_name: &str, attributes: &ScopeAttributes) -> Arc<Self> {
        let scope = Scope::new(scope_name);
        let style = attributes.theme.match_scope(scope.as_str(), std::iter::empty());
        let metadata = attributes.merge(attributes.default_metadata(), scope.as_str(), style);
        Arc::new(Self {
            parent: None,
            scope,
            metadata,
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn metadata(&self) -> TokenMetadata {
        self.metadata
    }

    pub fn parent(&self) -> Option<&Arc<ScopeListElement>> {
        self.parent.as_ref()
    }

    pub(crate) fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Pushes a scope path, `a.b c.d` pushing two scopes. `None` returns the same list.
    pub(crate) fn push(self: &Arc<Self>, scope_path: Option<&str>, attributes: &ScopeAttributes) -> Arc<Self> {
        let Some(scope_path) = scope_path else {
            return self.clone();
        };
        let mut current = self.clone();
        for scope in scope_path.split(' ').filter(|s| !s.is_empty()) {
            current = current.push_one(scope, attributes);
        }
        current
    }

    fn push_one(self: &Arc<Self>, scope: &str, attributes: &ScopeAttributes) -> Arc<Self> {
        let style = attributes.theme.match_scope(scope, self.ancestors());
        let metadata = attributes.merge(self.metadata, scope, style);
        Arc::new(Self {
            parent: Some(self.clone()),
            scope: Scope::new(scope),
            metadata,
        })
    }

    /// All the scopes from the outermost to this one
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = Vec::new();
        let mut current = Some(self);
        while let Some(element) = current {
            scopes.push(element.scope.clone());
            current = element.parent.as_deref();
        }
        scopes.reverse();
        scopes
    }
}

impl PartialEq for ScopeListElement {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if std::ptr::eq(x, y) {
                        return true;
                    }
                    if x.scope != y.scope || x.metadata != y.metadata {
                        return false;
                    }
                    a = x.parent.as_deref();
                    b = y.parent.as_deref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for ScopeListElement {}

impl Drop for ScopeListElement {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(element) = parent {
            parent = match Arc::into_inner(element) {
                Some(mut element) => element.parent.take(),
                None => None,
            };
        }
    }
}

impl fmt::Debug for ScopeListElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes: Vec<&str> = self.ancestors().collect();
        let path: Vec<&str> = scopes.into_iter().rev().collect();
        write!(f, "{}", path.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::themes::RawTheme;
    use std::collections::BTreeMap;

    fn theme() -> Theme {
        Theme::from_raw(
            &RawTheme::from_json(
                r##"{
                "settings": [
                    {"settings": {"foreground": "#111111", "background": "#222222"}},
                    {"scope": "string", "settings": {"foreground": "#333333"}},
                    {"scope": "source.x string.quoted", "settings": {"foreground": "#444444", "fontStyle": "italic"}}
                ]
            }"##,
            )
            .unwrap(),
        )
    }

    #[test]
    fn pushing_is_additive() {
        let theme = theme();
        let basic = BasicScopeAttributesProvider::new(1, &BTreeMap::new());
        let attributes = ScopeAttributes {
            basic: &basic,
            theme: &theme,
        };
        let root = ScopeListElement::root("source.x", &attributes);
        let pushed = root.push(Some("keyword.foo"), &attributes);
        assert_eq!(pushed.scopes(), vec![Scope::new("source.x"), Scope::new("keyword.foo")]);
        // The root is untouched
        assert_eq!(root.scopes(), vec![Scope::new("source.x")]);
        assert!(Arc::ptr_eq(&root.push(None, &attributes), &root));
    }

    #[test]
    fn splits_space_separated_paths() {
        let theme = Theme::default();
        let basic = BasicScopeAttributesProvider::new(0, &BTreeMap::new());
        let attributes = ScopeAttributes {
            basic: &basic,
            theme: &theme,
        };
        let list = ScopeListElement::root("source.x", &attributes).push(Some("a.b c.d"), &attributes);
        assert_eq!(format!("{list:?}"), "source.x a.b c.d");
    }

    #[test]
    fn resolves_metadata_along_the_path() {
        let theme = theme();
        let basic = BasicScopeAttributesProvider::new(1, &BTreeMap::new());
        let attributes = ScopeAttributes {
            basic: &basic,
            theme: &theme,
        };
        let root = ScopeListElement::root("source.x", &attributes);
        let defaults = theme.defaults();
        assert_eq!(root.metadata().language_id(), 1);
        assert_eq!(root.metadata().foreground(), defaults.foreground_id);
        assert_eq!(root.metadata().background(), defaults.background_id);

        let string = root.push(Some("string.quoted"), &attributes);
        let more_specific = string.metadata();
        assert!(more_specific.font_style().contains(crate::themes::FontStyle::ITALIC));
        assert_eq!(
            more_specific.token_type(),
            crate::metadata::StandardTokenType::String
        );
        assert_eq!(more_specific.background(), defaults.background_id);

        // Without the required ancestor only the plain `string` rule applies
        let other_root = ScopeListElement::root("source.y", &attributes);
        let other = other_root.push(Some("string.quoted"), &attributes).metadata();
        assert_ne!(other.foreground(), more_specific.foreground());
        assert!(other.font_style().is_empty());
    }

    #[test]
    fn equality_compares_scopes_and_metadata() {
        let theme = Theme::default();
        let basic = BasicScopeAttributesProvider::new(0, &BTreeMap::new());
        let attributes = ScopeAttributes {
            basic: &basic,
            theme: &theme,
        };
        let a = ScopeListElement::root("source.x", &attributes).push(Some("a"), &attributes);
        let b = ScopeListElement::root("source.x", &attributes).push(Some("a"), &attributes);
        let c = ScopeListElement::root("source.x", &attributes).push(Some("b"), &attributes);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn background_ids_past_the_field_width_inherit() {
        let mut rules = vec![r##"{"settings": {"foreground": "#010101", "background": "#020202"}}"##.to_string()];
        for i in 0..300 {
            rules.push(format!(r##"{{"scope": "c{i}", "settings": {{"foreground": "#{:06X}"}}}}"##, i + 16));
        }
        rules.push(r##"{"scope": "late", "settings": {"background": "#ABCDEF"}}"##.to_string());
        let theme = Theme::from_raw(&RawTheme::from_json(&format!(r#"{{"settings": [{}]}}"#, rules.join(","))).unwrap());
        assert!(theme.color_map().colors().len() > 256);

        let basic = BasicScopeAttributesProvider::new(0, &BTreeMap::new());
        let attributes = ScopeAttributes {
            basic: &basic,
            theme: &theme,
        };
        let root = ScopeListElement::root("source.x", &attributes);
        let late = root.push(Some("late"), &attributes).metadata();
        assert_eq!(late.background(), theme.defaults().background_id);
        let c299 = root.push(Some("c299"), &attributes).metadata();
        assert_eq!(theme.color_map().color(c299.foreground()), Some("#00013B"));
    }

    #[test]
    fn deep_lists_drop() {
        let theme = Theme::default();
        let basic = BasicScopeAttributesProvider::new(0, &BTreeMap::new());
        let attributes = ScopeAttributes {
            basic: &basic,
            theme: &theme,
        };
        let mut list = ScopeListElement::root("source.x", &attributes);
        for _ in 0..200_000 {
            list = list.push(Some("meta.paren"), &attributes);
        }
        assert_eq!(list.ancestors().count(), 200_001);
        drop(list);
    }
}
