//! TextMate scope selector parsing and matching.
//!
//! Used for grammar injections (`L:text.html -comment`) as well as the token type and
//! balanced bracket selectors of a grammar configuration.

use std::fmt;
use std::sync::LazyLock;

use onig::Regex;

use crate::scope::{Scope, is_scope_prefix};

/// `L:` injections are tried before the grammar's own patterns, `R:` after
/// and unprefixed ones in between. Sorting by this gives that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum InjectionPriority {
    Left = -1,
    #[default]
    Default = 0,
    Right = 1,
}

/// A compiled selector matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorMatcher {
    /// Space separated scopes that must all be found, in that order, in the scope path
    Path(Vec<Scope>),
    /// All matchers must succeed
    And(Vec<SelectorMatcher>),
    /// Any matcher can succeed (`|` or `,` separated inside parentheses)
    Or(Vec<SelectorMatcher>),
    /// Matcher must NOT succeed (`-` prefix)
    Not(Box<SelectorMatcher>),
}

impl SelectorMatcher {
    /// `scopes` is the scope path, outermost first
    pub fn matches<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        match self {
            SelectorMatcher::Path(identifiers) => {
                if scopes.len() < identifiers.len() {
                    return false;
                }
                let mut remaining = scopes.iter();
                identifiers.iter().all(|identifier| {
                    remaining.any(|scope| {
                        let scope = scope.as_ref();
                        !scope.is_empty() && is_scope_prefix(identifier.as_str(), scope)
                    })
                })
            }
            SelectorMatcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

impl fmt::Display for SelectorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorMatcher::Path(scopes) => {
                let parts: Vec<&str> = scopes.iter().map(|s| s.as_str()).collect();
                write!(f, "{}", parts.join(" "))
            }
            SelectorMatcher::And(matchers) => {
                let parts: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
                write!(f, "({})", parts.join(" & "))
            }
            SelectorMatcher::Or(matchers) => {
                let parts: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
                write!(f, "({})", parts.join(" | "))
            }
            SelectorMatcher::Not(matcher) => write!(f, "-{matcher}"),
        }
    }
}

/// A selector with the priority given by its `L:`/`R:` prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSelector {
    pub matcher: SelectorMatcher,
    pub priority: InjectionPriority,
}

/// Regex for tokenizing selectors, `*` is accepted in identifiers for `meta.tag.*.html`
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([LR]:|[\w\.:][\w\*\.:\-]*|[,|\-()])").expect("Invalid selector regex")
});

fn is_identifier(s: &str) -> bool {
    s.chars()
        .any(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':')
        && !matches!(s, "L:" | "R:")
}

/// `meta.tag.*.html` matches like `meta.tag`
fn identifier_scope(token: &str) -> Scope {
    match token.find(".*") {
        Some(pos) => Scope::new(token[..pos].trim_end_matches('.')),
        None => Scope::new(token),
    }
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn parse_operand(&mut self) -> Option<SelectorMatcher> {
        match self.peek()? {
            "-" => {
                self.advance();
                // A dangling `-` never matches
                let negated = self
                    .parse_operand()
                    .unwrap_or(SelectorMatcher::Not(Box::new(SelectorMatcher::And(vec![]))));
                Some(SelectorMatcher::Not(Box::new(negated)))
            }
            "(" => {
                self.advance();
                let inner = self.parse_inner_expression();
                if self.peek() == Some(")") {
                    self.advance();
                }
                Some(inner)
            }
            token if is_identifier(token) => {
                let mut scopes = Vec::new();
                while let Some(token) = self.peek()
                    && is_identifier(token)
                {
                    scopes.push(identifier_scope(token));
                    self.advance();
                }
                Some(SelectorMatcher::Path(scopes))
            }
            _ => None,
        }
    }

    fn parse_conjunction(&mut self) -> SelectorMatcher {
        let mut matchers = Vec::new();
        while let Some(m) = self.parse_operand() {
            matchers.push(m);
        }
        if matchers.len() == 1 {
            matchers.pop().unwrap_or(SelectorMatcher::And(vec![]))
        } else {
            SelectorMatcher::And(matchers)
        }
    }

    fn parse_inner_expression(&mut self) -> SelectorMatcher {
        let mut matchers = vec![self.parse_conjunction()];
        while matches!(self.peek(), Some("|" | ",")) {
            while matches!(self.peek(), Some("|" | ",")) {
                self.advance();
            }
            matchers.push(self.parse_conjunction());
        }
        if matchers.len() == 1 {
            matchers.pop().unwrap_or(SelectorMatcher::Or(vec![]))
        } else {
            SelectorMatcher::Or(matchers)
        }
    }
}

/// Parses a selector string into compiled matchers, one per top-level `,` separated part
pub fn parse_selector(selector: &str) -> Vec<CompiledSelector> {
    let tokens: Vec<&str> = TOKEN_REGEX
        .find_iter(selector)
        .map(|(start, end)| &selector[start..end])
        .filter(|token| !token.is_empty())
        .collect();
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let mut res = Vec::new();

    while let Some(token) = parser.peek() {
        let priority = match token {
            "L:" => InjectionPriority::Left,
            "R:" => InjectionPriority::Right,
            _ => InjectionPriority::Default,
        };
        if priority != InjectionPriority::Default {
            parser.advance();
        }

        let matcher = parser.parse_conjunction();
        res.push(CompiledSelector { matcher, priority });
        if parser.peek() == Some(",") {
            parser.advance();
        } else {
            break;
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn render(selector: &str) -> String {
        parse_selector(selector)
            .iter()
            .map(|s| format!("{:?} {}", s.priority, s.matcher))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_parse_injection_selectors() {
        assert_snapshot!(render("L:text.html.markdown"), @"Left text.html.markdown");
        assert_snapshot!(render("L:text.html -comment"), @"Left (text.html & -comment)");
        assert_snapshot!(render("source.js meta.embedded"), @"Default source.js meta.embedded");
        assert_snapshot!(
            render("L:text.pug -comment -string.comment, R:text.html.derivative -comment.block"),
            @r"
        Left (text.pug & -comment & -string.comment)
        Right (text.html.derivative & -comment.block)
        "
        );
        assert_snapshot!(
            render("L:(source.ts, source.js | source.coffee)"),
            @"Left (source.ts | source.js | source.coffee)"
        );
        assert_snapshot!(
            render("R:text.html - (comment.block, meta.tag.*.*.html)"),
            @"Right (text.html & -(comment.block | meta.tag))"
        );
    }

    #[test]
    fn matches_ordered_paths() {
        let matcher = &parse_selector("source.js string")[0].matcher;
        assert!(matcher.matches(&["source.js", "meta.block", "string.quoted"]));
        assert!(!matcher.matches(&["string.quoted", "source.js"]));
        assert!(!matcher.matches(&["source.json", "string"]));
    }

    #[test]
    fn matches_negations_and_alternatives() {
        let matcher = &parse_selector("L:source.x -comment")[0].matcher;
        assert!(matcher.matches(&["source.x"]));
        assert!(!matcher.matches(&["source.x", "comment.line"]));

        let matcher = &parse_selector("(comment | string) - string.regexp")[0].matcher;
        assert!(matcher.matches(&["source", "comment"]));
        assert!(matcher.matches(&["source", "string.quoted"]));
        assert!(!matcher.matches(&["source", "string.regexp"]));
        assert!(!matcher.matches(&["source", "keyword"]));
    }

    #[test]
    fn priorities_sort_left_first() {
        let mut priorities = vec![
            InjectionPriority::Right,
            InjectionPriority::Default,
            InjectionPriority::Left,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                InjectionPriority::Left,
                InjectionPriority::Default,
                InjectionPriority::Right
            ]
        );
    }
}
