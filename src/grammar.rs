use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GrammarConfiguration;
use crate::grammars::{CompiledGrammar, Regex, RegexBackend};
use crate::metadata::BasicScopeAttributesProvider;
use crate::source::SourceLine;
use crate::themes::ThemeProvider;
use crate::tokenizer::{
    BalancedBracketSelectors, BinaryToken, LineTokens, ScopeAttributes, ScopeListElement,
    StackElement, Token, TokenTypeMatcher, Tokenizer, TokenizerContext,
};

#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    pub tokens: Vec<Token>,
    /// State to pass when tokenizing the next line
    pub next_state: Arc<StackElement>,
    /// The time limit was reached: the end of the line is a single token
    pub stopped_early: bool,
}

#[derive(Debug, Clone)]
pub struct TokenizeLineBinaryResult {
    pub tokens: Vec<BinaryToken>,
    /// State to pass when tokenizing the next line
    pub next_state: Arc<StackElement>,
    /// The time limit was reached: the end of the line is a single token
    pub stopped_early: bool,
}

/// A compiled grammar ready to tokenize lines, obtained from a [`crate::Registry`].
///
/// Tokenizing doesn't mutate the grammar beyond caches so a grammar can be shared
/// between threads.
pub struct Grammar {
    compiled: Arc<CompiledGrammar>,
    attributes: BasicScopeAttributesProvider,
    token_types: Vec<TokenTypeMatcher>,
    brackets: Option<BalancedBracketSelectors>,
    theme: Arc<ThemeProvider>,
    backend: Arc<dyn RegexBackend>,
    dynamic_regexes: papaya::HashMap<Arc<str>, Arc<Regex>>,
}

impl Grammar {
    pub(crate) fn new(
        compiled: Arc<CompiledGrammar>,
        configuration: Option<&GrammarConfiguration>,
        theme: Arc<ThemeProvider>,
        backend: Arc<dyn RegexBackend>,
    ) -> Self {
        let (attributes, token_types, brackets) = match configuration {
            Some(config) => (
                BasicScopeAttributesProvider::new(config.initial_language, &config.embedded_languages),
                config
                    .token_types
                    .iter()
                    .flat_map(|(selector, token_type)| TokenTypeMatcher::from_selector(selector, *token_type))
                    .collect(),
                Some(BalancedBracketSelectors::new(
                    &config.balanced_bracket_selectors,
                    &config.unbalanced_bracket_selectors,
                )),
            ),
            None => (BasicScopeAttributesProvider::new(0, &BTreeMap::new()), Vec::new(), None),
        };

        Self {
            compiled,
            attributes,
            token_types,
            brackets,
            theme,
            backend,
            dynamic_regexes: papaya::HashMap::new(),
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.compiled.scope_name
    }

    pub fn compiled(&self) -> &CompiledGrammar {
        &self.compiled
    }

    fn tokenize<T>(
        &self,
        line_text: &str,
        prev_state: Option<&Arc<StackElement>>,
        time_limit: Option<Duration>,
        emit_binary: bool,
        finish: impl FnOnce(LineTokens<'_>, &StackElement) -> T,
    ) -> (T, Arc<StackElement>, bool) {
        let theme = self.theme.current();
        let attributes = ScopeAttributes {
            basic: &self.attributes,
            theme: &theme,
        };

        let (stack, is_first_line) = match prev_state {
            Some(state) => (state.reset(), false),
            None => {
                let scopes = ScopeListElement::root(&self.compiled.scope_name, &attributes);
                (StackElement::root(self.compiled.root, scopes), true)
            }
        };

        let line = SourceLine::new(format!("{line_text}\n"));
        let mut tokens = LineTokens::new(emit_binary, &line, &self.token_types, self.brackets.as_ref());
        let mut tokenizer = Tokenizer::new(TokenizerContext {
            compiled: &self.compiled,
            backend: self.backend.as_ref(),
            dynamic_regexes: &self.dynamic_regexes,
            attributes,
        });
        let deadline = time_limit.map(|limit| Instant::now() + limit);
        let (stack, stopped_early) =
            tokenizer.tokenize_string(&line, is_first_line, 0, stack, &mut tokens, true, deadline);

        let result = finish(tokens, &stack);
        (result, stack.reset(), stopped_early)
    }

    /// Tokenizes a single line, without its line terminator.
    ///
    /// `prev_state` is the `next_state` of the previous line, `None` for the first line
    /// of a document.
    pub fn tokenize_line(
        &self,
        line: &str,
        prev_state: Option<&Arc<StackElement>>,
        time_limit: Option<Duration>,
    ) -> TokenizeLineResult {
        let (tokens, next_state, stopped_early) =
            self.tokenize(line, prev_state, time_limit, false, |tokens, stack| tokens.into_tokens(stack));
        TokenizeLineResult {
            tokens,
            next_state,
            stopped_early,
        }
    }

    /// Same as [`Grammar::tokenize_line`] but with tokens carrying their packed metadata
    /// instead of scopes. Consecutive tokens with the same metadata are merged.
    pub fn tokenize_line_binary(
        &self,
        line: &str,
        prev_state: Option<&Arc<StackElement>>,
        time_limit: Option<Duration>,
    ) -> TokenizeLineBinaryResult {
        let (tokens, next_state, stopped_early) = self.tokenize(line, prev_state, time_limit, true, |tokens, stack| {
            tokens.into_binary_tokens(stack)
        });
        TokenizeLineBinaryResult {
            tokens,
            next_state,
            stopped_early,
        }
    }

    /// Tokenizes a whole document, one entry per line
    pub fn tokenize_lines(&self, text: &str) -> Vec<Vec<Token>> {
        let mut state: Option<Arc<StackElement>> = None;
        let mut lines = Vec::new();
        for line in text.lines() {
            let result = self.tokenize_line(line, state.as_ref(), None);
            lines.push(result.tokens);
            state = Some(result.next_state);
        }
        lines
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("scope_name", &self.compiled.scope_name)
            .field("rules", &self.compiled.rules.len())
            .field("injections", &self.compiled.injections.len())
            .finish()
    }
}
