use serde::Serialize;

use crate::grammars::{SelectorMatcher, parse_selector};
use crate::metadata::{StandardTokenType, TokenMetadata};
use crate::scope::Scope;
use crate::source::SourceLine;
use crate::tokenizer::scope_list::ScopeListElement;
use crate::tokenizer::stack::StackElement;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Token {
    /// Character offset of the first character of the token
    pub start: usize,
    /// Character offset right after the token
    pub end: usize,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<Scope>,
}

/// A token in its compact form: it goes until the start of the next one, or the end
/// of the line for the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinaryToken {
    /// Character offset of the first character of the token
    pub start: usize,
    pub metadata: TokenMetadata,
}

/// Forces a token type on tokens whose scopes match a selector
#[derive(Debug, Clone)]
pub(crate) struct TokenTypeMatcher {
    matcher: SelectorMatcher,
    token_type: StandardTokenType,
}

impl TokenTypeMatcher {
    pub(crate) fn from_selector(selector: &str, token_type: StandardTokenType) -> Vec<Self> {
        parse_selector(selector)
            .into_iter()
            .map(|compiled| Self {
                matcher: compiled.matcher,
                token_type,
            })
            .collect()
    }
}

/// Decides which tokens can contain brackets that should be balanced
#[derive(Debug, Clone, Default)]
pub(crate) struct BalancedBracketSelectors {
    balanced: Vec<SelectorMatcher>,
    unbalanced: Vec<SelectorMatcher>,
    /// `*` was given as a balanced selector
    allow_any: bool,
}

impl BalancedBracketSelectors {
    pub(crate) fn new(balanced: &[String], unbalanced: &[String]) -> Self {
        let mut allow_any = false;
        let balanced = balanced
            .iter()
            .filter(|selector| {
                if selector.as_str() == "*" {
                    allow_any = true;
                    false
                } else {
                    true
                }
            })
            .flat_map(|selector| parse_selector(selector))
            .map(|compiled| compiled.matcher)
            .collect();
        let unbalanced = unbalanced
            .iter()
            .flat_map(|selector| parse_selector(selector))
            .map(|compiled| compiled.matcher)
            .collect();
        Self {
            balanced,
            unbalanced,
            allow_any,
        }
    }

    fn matches_always(&self) -> bool {
        self.allow_any && self.unbalanced.is_empty()
    }

    fn matches_never(&self) -> bool {
        self.balanced.is_empty() && !self.allow_any
    }

    fn matches(&self, scopes: &[Scope]) -> bool {
        if self.unbalanced.iter().any(|m| m.matches(scopes)) {
            return false;
        }
        if self.balanced.iter().any(|m| m.matches(scopes)) {
            return true;
        }
        self.allow_any
    }
}

/// Collects the tokens of a line as the tokenizer advances.
///
/// Offsets are bytes of `line` until the tokens are returned.
pub(crate) struct LineTokens<'a> {
    emit_binary: bool,
    /// The whole line with its added `\n`, used to convert offsets to characters
    line: &'a SourceLine,
    token_types: &'a [TokenTypeMatcher],
    brackets: Option<&'a BalancedBracketSelectors>,
    tokens: Vec<(usize, usize, Vec<Scope>)>,
    binary_tokens: Vec<(usize, TokenMetadata)>,
    /// Position up to which tokens have been generated
    last_end: usize,
}

impl<'a> LineTokens<'a> {
    pub(crate) fn new(
        emit_binary: bool,
        line: &'a SourceLine,
        token_types: &'a [TokenTypeMatcher],
        brackets: Option<&'a BalancedBracketSelectors>,
    ) -> Self {
        Self {
            emit_binary,
            line,
            token_types,
            brackets,
            tokens: Vec::new(),
            binary_tokens: Vec::new(),
            last_end: 0,
        }
    }

    pub(crate) fn produce(&mut self, stack: &StackElement, end: usize) {
        self.produce_from_scopes(stack.content_name_scopes(), end);
    }

    pub(crate) fn produce_from_scopes(&mut self, scopes: &ScopeListElement, end: usize) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end >= end {
            return;
        }
        log::trace!("[produce] {}..{end} {scopes:?}", self.last_end);

        if self.emit_binary {
            let metadata = self.binary_metadata(scopes);
            if self.binary_tokens.last().is_some_and(|(_, m)| *m == metadata) {
                // no need to push a token with the same metadata
                self.last_end = end;
                return;
            }
            self.binary_tokens.push((self.last_end, metadata));
        } else {
            self.tokens.push((self.last_end, end, scopes.scopes()));
        }
        self.last_end = end;
    }

    fn binary_metadata(&self, scopes: &ScopeListElement) -> TokenMetadata {
        let mut metadata = scopes.metadata();
        let mut balanced = self.brackets.is_some_and(|b| b.matches_always());

        let brackets_need_scopes = self
            .brackets
            .is_some_and(|b| !b.matches_always() && !b.matches_never());
        // Only generate the scope list when required
        if !self.token_types.is_empty() || brackets_need_scopes {
            let names = scopes.scopes();
            for token_type in self.token_types {
                if token_type.matcher.matches(&names) {
                    metadata = metadata.set(0, Some(token_type.token_type), None, None, 0, 0);
                }
            }
            if let Some(brackets) = self.brackets {
                balanced = brackets.matches(&names);
            }
        }

        if balanced {
            metadata = metadata.set(0, None, Some(true), None, 0, 0);
        }
        metadata
    }

    /// Char length of the line without the added `\n`
    fn content_char_len(&self) -> usize {
        self.line.char_len().saturating_sub(1)
    }

    /// Similar to LineTokens.getResult in vscode-textmate: the token for the added
    /// newline is dropped and the last token stops at the end of the content
    pub(crate) fn into_tokens(mut self, stack: &StackElement) -> Vec<Token> {
        let line_len = self.line.len();
        if self.tokens.last().is_some_and(|(start, _, _)| *start + 1 == line_len) {
            self.tokens.pop();
        }
        if self.tokens.is_empty() {
            self.tokens
                .push((0, line_len, stack.content_name_scopes().scopes()));
        }

        let content_len = self.content_char_len();
        let line = self.line;
        let mut tokens: Vec<Token> = self
            .tokens
            .into_iter()
            .map(|(start, end, scopes)| Token {
                start: line.byte_to_char(start).min(content_len),
                end: line.byte_to_char(end).min(content_len),
                scopes,
            })
            .collect();
        if let Some(last) = tokens.last_mut() {
            last.end = content_len;
        }
        tokens
    }

    pub(crate) fn into_binary_tokens(mut self, stack: &StackElement) -> Vec<BinaryToken> {
        let line_len = self.line.len();
        if self.binary_tokens.last().is_some_and(|(start, _)| *start + 1 == line_len) {
            self.binary_tokens.pop();
        }
        if self.binary_tokens.is_empty() {
            let metadata = self.binary_metadata(stack.content_name_scopes());
            self.binary_tokens.push((0, metadata));
        }

        let content_len = self.content_char_len();
        let line = self.line;
        self.binary_tokens
            .into_iter()
            .map(|(start, metadata)| BinaryToken {
                start: line.byte_to_char(start).min(content_len),
                metadata,
            })
            .collect()
    }
}
