use std::cmp::Ordering;

use crate::scope::{Scope, is_scope_prefix};
use crate::themes::FontStyle;
use crate::themes::color::is_valid_hex_color;
use crate::themes::raw::RawThemeSetting;

/// Represents a parent scope requirement in a theme selector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Parent {
    /// Parent scope that can appear anywhere up the scope stack
    /// `Anywhere(source.js)` from "source.js meta.function" - can have scopes between
    Anywhere(Scope),
    /// Parent scope that must be the immediate parent (child combinator `>`)
    /// `Direct(meta.function)` from "meta.function > string" - must be immediate parent
    Direct(Scope),
}

impl Parent {
    pub fn scope(&self) -> &Scope {
        match self {
            Parent::Anywhere(s) | Parent::Direct(s) => s,
        }
    }
}

/// One selector of a theme rule, after splitting the comma separated list
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedThemeRule {
    /// The target scope (rightmost in the selector string), empty for the defaults rule
    pub scope: String,
    /// Required parents, innermost first. `None` if the selector had only one scope.
    pub parent_scopes: Option<Vec<Parent>>,
    /// Position of the rule in the theme, used to keep declaration order when sorting
    pub index: usize,
    pub font_style: Option<FontStyle>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

/// Splits a selector like `source.js meta.function > string` into the target scope and
/// its parents, innermost first.
pub fn parse_selector(input: &str) -> (String, Option<Vec<Parent>>) {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let Some((last, rest)) = parts.split_last() else {
        return (String::new(), None);
    };
    if rest.is_empty() {
        return (last.to_string(), None);
    }

    let mut parents = Vec::new();
    let mut is_direct = false;
    for part in rest.iter().rev() {
        if *part == ">" {
            is_direct = true;
            continue;
        }
        let parent_scope = Scope::new(part);
        parents.push(if is_direct {
            Parent::Direct(parent_scope)
        } else {
            Parent::Anywhere(parent_scope)
        });
        is_direct = false;
    }

    (last.to_string(), Some(parents))
}

/// Turns the raw theme rules into one [`ParsedThemeRule`] per selector.
///
/// Colours that are not valid hex colours are ignored, a missing `fontStyle` means
/// not set while an empty one means no style.
pub fn parse_theme(rules: &[RawThemeSetting]) -> Vec<ParsedThemeRule> {
    let mut out = Vec::new();

    for (index, rule) in rules.iter().enumerate() {
        let scopes: Vec<&str> = match &rule.scope {
            Some(scopes) => scopes.iter().map(|s| s.as_str()).collect(),
            None => vec![""],
        };

        let font_style = rule.settings.font_style.as_deref().map(FontStyle::from_str);

        let foreground = rule.settings.foreground().and_then(|c| {
            if is_valid_hex_color(c) {
                Some(c.to_string())
            } else {
                log::warn!("Ignoring invalid foreground colour {c:?} in theme");
                None
            }
        });
        let background = rule.settings.background().and_then(|c| {
            if is_valid_hex_color(c) {
                Some(c.to_string())
            } else {
                log::warn!("Ignoring invalid background colour {c:?} in theme");
                None
            }
        });

        for selector in scopes {
            let (scope, parent_scopes) = parse_selector(selector.trim());
            out.push(ParsedThemeRule {
                scope,
                parent_scopes,
                index,
                font_style,
                foreground: foreground.clone(),
                background: background.clone(),
            });
        }
    }

    out
}

/// Compares two optional parent lists: `None` first, then shorter lists, then item by item.
pub(crate) fn cmp_parent_scopes(a: Option<&[Parent]>, b: Option<&[Parent]>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Checks the required parents against the scopes enclosing the one being matched.
/// `ancestors` yields the enclosing scopes innermost first.
pub(crate) fn matches_parent_scopes<'a, I>(mut ancestors: I, parents: &[Parent]) -> bool
where
    I: Iterator<Item = &'a str>,
{
    for parent in parents {
        match parent {
            Parent::Direct(scope) => match ancestors.next() {
                Some(s) if is_scope_prefix(scope.as_str(), s) => {}
                _ => return false,
            },
            Parent::Anywhere(scope) => {
                if !ancestors.any(|s| is_scope_prefix(scope.as_str(), s)) {
                    return false;
                }
            }
        }
    }
    true
}
