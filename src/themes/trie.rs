//! Theme rules stored in a trie keyed by scope atoms.
//!
//! Every node carries the resolved rule for its scope (inheriting from its ancestors when
//! it was created) and the rules that additionally require parent scopes.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::themes::FontStyle;
use crate::themes::selector::{Parent, cmp_parent_scopes};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ThemeTrieRule {
    /// Number of atoms of the scope that set this rule
    pub(crate) scope_depth: usize,
    pub(crate) parent_scopes: Option<Vec<Parent>>,
    pub(crate) font_style: Option<FontStyle>,
    /// Colour ids, 0 is not set
    pub(crate) foreground: u32,
    pub(crate) background: u32,
}

impl ThemeTrieRule {
    fn accept_overwrite(
        &mut self,
        scope_depth: usize,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) {
        if self.scope_depth <= scope_depth {
            self.scope_depth = scope_depth;
        }
        if font_style.is_some() {
            self.font_style = font_style;
        }
        if foreground != 0 {
            self.foreground = foreground;
        }
        if background != 0 {
            self.background = background;
        }
    }

    fn parents(&self) -> &[Parent] {
        self.parent_scopes.as_deref().unwrap_or(&[])
    }
}

/// Deeper scopes first, then longer parent scopes, then more parents.
fn cmp_by_specificity(a: &ThemeTrieRule, b: &ThemeTrieRule) -> Ordering {
    if a.scope_depth != b.scope_depth {
        return b.scope_depth.cmp(&a.scope_depth);
    }
    let (a_parents, b_parents) = (a.parents(), b.parents());
    for (pa, pb) in a_parents.iter().zip(b_parents) {
        let diff = pb.scope().as_str().len().cmp(&pa.scope().as_str().len());
        if diff != Ordering::Equal {
            return diff;
        }
    }
    b_parents.len().cmp(&a_parents.len())
}

#[derive(Debug, Clone)]
pub(crate) struct ThemeTrieElement {
    main_rule: ThemeTrieRule,
    rules_with_parents: Vec<ThemeTrieRule>,
    children: HashMap<String, ThemeTrieElement>,
}

impl ThemeTrieElement {
    pub(crate) fn new(main_rule: ThemeTrieRule) -> Self {
        Self {
            main_rule,
            rules_with_parents: Vec::new(),
            children: HashMap::new(),
        }
    }

    /// All the candidate rules for that scope, most specific first.
    pub(crate) fn find(&self, scope: &str) -> Vec<ThemeTrieRule> {
        if !scope.is_empty() {
            let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
            if let Some(child) = self.children.get(head) {
                return child.find(tail);
            }
        }

        let mut rules = Vec::with_capacity(1 + self.rules_with_parents.len());
        rules.push(self.main_rule.clone());
        rules.extend(self.rules_with_parents.iter().cloned());
        rules.sort_by(cmp_by_specificity);
        rules
    }

    pub(crate) fn insert(
        &mut self,
        scope_depth: usize,
        scope: &str,
        parent_scopes: Option<&[Parent]>,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) {
        if scope.is_empty() {
            self.insert_here(scope_depth, parent_scopes, font_style, foreground, background);
            return;
        }

        let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
        let main_rule = &self.main_rule;
        let rules_with_parents = &self.rules_with_parents;
        let child = self.children.entry(head.to_string()).or_insert_with(|| {
            let mut child = ThemeTrieElement::new(main_rule.clone());
            child.rules_with_parents = rules_with_parents.clone();
            child
        });
        child.insert(
            scope_depth + 1,
            tail,
            parent_scopes,
            font_style,
            foreground,
            background,
        );
    }

    fn insert_here(
        &mut self,
        scope_depth: usize,
        parent_scopes: Option<&[Parent]>,
        mut font_style: Option<FontStyle>,
        mut foreground: u32,
        mut background: u32,
    ) {
        let Some(parent_scopes) = parent_scopes else {
            self.main_rule
                .accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        };

        for rule in &mut self.rules_with_parents {
            if cmp_parent_scopes(rule.parent_scopes.as_deref(), Some(parent_scopes))
                == Ordering::Equal
            {
                rule.accept_overwrite(scope_depth, font_style, foreground, background);
                return;
            }
        }

        // A new rule with parents inherits whatever it doesn't set from the main rule
        if font_style.is_none() {
            font_style = self.main_rule.font_style;
        }
        if foreground == 0 {
            foreground = self.main_rule.foreground;
        }
        if background == 0 {
            background = self.main_rule.background;
        }
        self.rules_with_parents.push(ThemeTrieRule {
            scope_depth,
            parent_scopes: Some(parent_scopes.to_vec()),
            font_style,
            foreground,
            background,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    fn root() -> ThemeTrieElement {
        ThemeTrieElement::new(ThemeTrieRule {
            scope_depth: 0,
            parent_scopes: None,
            font_style: None,
            foreground: 0,
            background: 0,
        })
    }

    #[test]
    fn children_inherit_from_their_parent() {
        let mut trie = root();
        trie.insert(0, "string", None, Some(FontStyle::ITALIC), 2, 0);
        trie.insert(0, "string.quoted", None, None, 3, 0);

        let rules = trie.find("string.quoted.double");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].scope_depth, 2);
        assert_eq!(rules[0].foreground, 3);
        assert_eq!(rules[0].font_style, Some(FontStyle::ITALIC));

        let rules = trie.find("string.unquoted");
        assert_eq!(rules[0].scope_depth, 1);
        assert_eq!(rules[0].foreground, 2);

        let rules = trie.find("keyword");
        assert_eq!(rules[0].scope_depth, 0);
        assert_eq!(rules[0].foreground, 0);
    }

    #[test]
    fn rules_with_parents_are_sorted_by_specificity() {
        let mut trie = root();
        let short = vec![Parent::Anywhere(Scope::new("source"))];
        let long = vec![Parent::Anywhere(Scope::new("source.rust"))];
        let two = vec![
            Parent::Anywhere(Scope::new("meta")),
            Parent::Anywhere(Scope::new("source")),
        ];
        trie.insert(0, "string", None, None, 1, 0);
        trie.insert(0, "string", Some(&short), None, 2, 0);
        trie.insert(0, "string", Some(&long), None, 3, 0);
        trie.insert(0, "string", Some(&two), None, 4, 0);
        // same parents merge into the existing rule
        trie.insert(0, "string", Some(&short), Some(FontStyle::BOLD), 0, 0);

        let rules = trie.find("string");
        let fgs: Vec<u32> = rules.iter().map(|r| r.foreground).collect();
        assert_eq!(fgs, vec![3, 2, 4, 1]);
        assert_eq!(rules[1].font_style, Some(FontStyle::BOLD));
    }
}
