//! This file replicates the logic of <https://github.com/microsoft/vscode-textmate>

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::grammars::{
    CaptureSpans, CompiledGrammar, CompiledPattern, InjectionPriority, PatternSet, PatternSetMatch,
    Regex, RegexBackend, RegexId, Rule, RuleId, RuleName, resolve_backreferences,
};
use crate::source::SourceLine;
use crate::tokenizer::anchors::AnchorActive;

pub(crate) mod anchors;
mod line_tokens;
mod scope_list;
mod stack;

pub use line_tokens::{BinaryToken, Token};
pub(crate) use line_tokens::{BalancedBracketSelectors, LineTokens, TokenTypeMatcher};
pub(crate) use scope_list::ScopeAttributes;
pub use scope_list::ScopeListElement;
pub use stack::StackElement;

/// Resolved end/while patterns kept by a grammar before the cache is emptied.
/// Every heredoc delimiter is a new pattern so the cache can't grow forever.
pub(crate) const MAX_DYNAMIC_REGEXES: usize = 256;

type PatternSetKey = (RuleId, AnchorActive, Option<Arc<str>>);
type PatternSetItem = (RuleId, Option<Arc<dyn CompiledPattern>>, bool);

/// Everything a line needs from the grammar it's tokenized with
pub(crate) struct TokenizerContext<'a> {
    pub(crate) compiled: &'a CompiledGrammar,
    pub(crate) backend: &'a dyn RegexBackend,
    /// End and while patterns with their back-references resolved, by source
    pub(crate) dynamic_regexes: &'a papaya::HashMap<Arc<str>, Arc<Regex>>,
    pub(crate) attributes: ScopeAttributes<'a>,
}

impl TokenizerContext<'_> {
    fn dynamic_regex(&self, source: &Arc<str>) -> Arc<Regex> {
        let regexes = self.dynamic_regexes.pin();
        if let Some(regex) = regexes.get(source) {
            return regex.clone();
        }
        // Pattern sets already built hold their own references
        if regexes.len() >= MAX_DYNAMIC_REGEXES {
            log::debug!("[dynamic_regex] emptying the cache of {} resolved patterns", regexes.len());
            regexes.clear();
        }
        regexes
            .get_or_insert_with(source.clone(), || Arc::new(Regex::new(source)))
            .clone()
    }

    /// The end (or while) pattern of a frame: the resolved one if the template has
    /// back-references, the static one otherwise
    fn end_item(
        &self,
        regex_id: RegexId,
        has_backrefs: bool,
        resolved: Option<&Arc<str>>,
        anchor: AnchorActive,
        marker: RuleId,
    ) -> PatternSetItem {
        match resolved.filter(|_| has_backrefs) {
            Some(source) => {
                let regex = self.dynamic_regex(source);
                (marker, regex.compiled(self.backend, anchor), regex.has_g_anchor())
            }
            None => {
                let regex = self.compiled.regex(regex_id);
                (marker, regex.compiled(self.backend, anchor), regex.has_g_anchor())
            }
        }
    }

    fn rule_pattern_set(&self, rule_id: RuleId, end_rule: Option<&Arc<str>>, anchor: AnchorActive) -> PatternSet {
        let compiled = self.compiled;
        let mut items: Vec<PatternSetItem> = compiled
            .collected_patterns(rule_id)
            .iter()
            .filter_map(|&id| {
                let regex = compiled.regex(compiled.rule(id).entry_regex()?);
                Some((id, regex.compiled(self.backend, anchor), regex.has_g_anchor()))
            })
            .collect();

        if let Rule::BeginEnd(rule) = compiled.rule(rule_id) {
            let end = self.end_item(rule.end, rule.end_has_backrefs, end_rule, anchor, RuleId::END);
            if rule.apply_end_pattern_last {
                items.push(end);
            } else {
                items.insert(0, end);
            }
        }
        log::debug!(
            "[rule_pattern_set] {} patterns for rule {} ({anchor:?})",
            items.len(),
            *rule_id
        );
        PatternSet::new(items)
    }

    fn while_pattern_set(&self, rule_id: RuleId, end_rule: Option<&Arc<str>>, anchor: AnchorActive) -> PatternSet {
        let items = match self.compiled.rule(rule_id) {
            Rule::BeginWhile(rule) => vec![self.end_item(
                rule.while_,
                rule.while_has_backrefs,
                end_rule,
                anchor,
                RuleId::WHILE,
            )],
            _ => Vec::new(),
        };
        PatternSet::new(items)
    }

    fn resolve_name<'n>(&self, name: Option<&'n RuleName>, text: &str, spans: &CaptureSpans) -> Option<Cow<'n, str>> {
        name.map(|n| n.resolve(text, spans))
    }
}

/// Tokenizes lines of a single grammar, caching the pattern sets it builds.
///
/// A tokenizer lives for a single line since the pattern set memos are keyed by line.
pub(crate) struct Tokenizer<'a> {
    ctx: TokenizerContext<'a>,
    pattern_sets: HashMap<PatternSetKey, PatternSet>,
    while_sets: HashMap<PatternSetKey, PatternSet>,
}

struct WhileCheckResult {
    stack: Arc<StackElement>,
    line_pos: usize,
    anchor_position: Option<usize>,
    is_first_line: bool,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(ctx: TokenizerContext<'a>) -> Self {
        Self {
            ctx,
            pattern_sets: HashMap::new(),
            while_sets: HashMap::new(),
        }
    }

    fn rule_pattern_set(
        &mut self,
        rule_id: RuleId,
        end_rule: Option<&Arc<str>>,
        anchor: AnchorActive,
    ) -> &mut PatternSet {
        let ctx = &self.ctx;
        self.pattern_sets
            .entry((rule_id, anchor, end_rule.cloned()))
            .or_insert_with(|| ctx.rule_pattern_set(rule_id, end_rule, anchor))
    }

    fn while_pattern_set(
        &mut self,
        rule_id: RuleId,
        end_rule: Option<&Arc<str>>,
        anchor: AnchorActive,
    ) -> &mut PatternSet {
        let ctx = &self.ctx;
        self.while_sets
            .entry((rule_id, anchor, end_rule.cloned()))
            .or_insert_with(|| ctx.while_pattern_set(rule_id, end_rule, anchor))
    }

    /// Earliest injection match, with whether it came from a left priority injection.
    /// Injections are sorted by priority so ties go to the higher priority.
    fn match_injections(
        &mut self,
        line: &SourceLine,
        is_first_line: bool,
        line_pos: usize,
        stack: &StackElement,
        anchor_position: Option<usize>,
    ) -> Option<(bool, PatternSetMatch)> {
        let compiled = self.ctx.compiled;
        if compiled.injections.is_empty() {
            return None;
        }

        let scopes = stack.content_name_scopes().scopes();
        let anchor = AnchorActive::new(is_first_line, anchor_position, line_pos);
        let mut best: Option<(bool, PatternSetMatch)> = None;

        for injection in &compiled.injections {
            if !injection.matcher.matches(scopes.as_slice()) {
                continue;
            }
            let set = self.rule_pattern_set(injection.rule_id, None, anchor);
            let Some(found) = set.find_at(line, line_pos) else {
                continue;
            };
            if best.as_ref().is_some_and(|(_, b)| found.start >= b.start) {
                continue;
            }
            log::trace!(
                "[match_injections] {} matched at {}..{}",
                injection.selector,
                found.start,
                found.end
            );
            let done = found.start == line_pos;
            best = Some((injection.priority == InjectionPriority::Left, found));
            if done {
                // Can't do better than a match at the current position
                break;
            }
        }
        best
    }

    fn match_rule_or_injections(
        &mut self,
        line: &SourceLine,
        is_first_line: bool,
        line_pos: usize,
        stack: &StackElement,
        anchor_position: Option<usize>,
    ) -> Option<PatternSetMatch> {
        let anchor = AnchorActive::new(is_first_line, anchor_position, line_pos);
        let rule_match = self
            .rule_pattern_set(stack.rule_id(), stack.end_rule(), anchor)
            .find_at(line, line_pos);

        let Some((left_priority, injection_match)) =
            self.match_injections(line, is_first_line, line_pos, stack, anchor_position)
        else {
            return rule_match;
        };

        match rule_match {
            None => Some(injection_match),
            Some(m) => {
                if injection_match.start < m.start || (injection_match.start == m.start && left_priority) {
                    log::debug!("[match_rule_or_injections] injection wins at {}", injection_match.start);
                    Some(injection_match)
                } else {
                    Some(m)
                }
            }
        }
    }

    /// Produces the tokens of the captures of a match, nesting them by position.
    /// Captures of a `patterns` capture rule are tokenized again with those patterns.
    fn handle_captures(
        &mut self,
        line: &SourceLine,
        is_first_line: bool,
        stack: &Arc<StackElement>,
        tokens: &mut LineTokens,
        captures: &[Option<RuleId>],
        spans: &CaptureSpans,
    ) {
        if captures.is_empty() {
            return;
        }
        let compiled = self.ctx.compiled;
        let attributes = self.ctx.attributes;
        let len = captures.len().min(spans.len());
        let Some((_, max_end)) = spans.first().copied().flatten() else {
            return;
        };

        // Scopes of the captures still open, with where they end
        let mut local_stack: Vec<(Arc<ScopeListElement>, usize)> = Vec::new();

        for i in 0..len {
            let Some(capture_id) = captures[i] else {
                continue;
            };
            let Rule::Capture(capture) = compiled.rule(capture_id) else {
                continue;
            };
            let Some((start, end)) = spans[i] else {
                continue;
            };
            if start == end {
                continue;
            }
            if start > max_end {
                // Captures in a lookahead
                break;
            }

            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= start
            {
                tokens.produce_from_scopes(scopes, *end_pos);
                local_stack.pop();
            }
            match local_stack.last() {
                Some((scopes, _)) => tokens.produce_from_scopes(scopes, start),
                None => tokens.produce(stack, start),
            }

            let name = self.ctx.resolve_name(capture.name.as_ref(), line.as_str(), spans);
            if let Some(retokenize) = capture.retokenize {
                let content_name = self
                    .ctx
                    .resolve_name(capture.content_name.as_ref(), line.as_str(), spans);
                let name_scopes = stack.content_name_scopes().push(name.as_deref(), &attributes);
                let content_scopes = name_scopes.push(content_name.as_deref(), &attributes);
                let sub_stack = stack
                    .push(retokenize, Some(start), None, false, name_scopes)
                    .with_content_name_scopes(content_scopes);
                log::debug!("[handle_captures] retokenizing capture {i} at {start}..{end}");
                let sub_line = SourceLine::new(&line.as_str()[..end]);
                self.tokenize_string(
                    &sub_line,
                    is_first_line && start == 0,
                    start,
                    sub_stack,
                    tokens,
                    false,
                    None,
                );
                continue;
            }

            if let Some(name) = name {
                let base = match local_stack.last() {
                    Some((scopes, _)) => scopes.clone(),
                    None => stack.content_name_scopes().clone(),
                };
                local_stack.push((base.push(Some(&name), &attributes), end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            tokens.produce_from_scopes(&scopes, end_pos);
        }
    }

    /// While rules are checked at the start of every line, from the outermost one.
    /// The first one that doesn't match is popped, with everything above it.
    fn check_while_conditions(
        &mut self,
        line: &SourceLine,
        mut is_first_line: bool,
        mut line_pos: usize,
        mut stack: Arc<StackElement>,
        tokens: &mut LineTokens,
    ) -> WhileCheckResult {
        let compiled = self.ctx.compiled;
        let mut anchor_position = if stack.begin_rule_captured_eol() {
            Some(0)
        } else {
            None
        };

        let mut while_frames: Vec<Arc<StackElement>> = Vec::new();
        let mut node = Some(stack.clone());
        while let Some(frame) = node {
            if matches!(compiled.rule(frame.rule_id()), Rule::BeginWhile(_)) {
                while_frames.push(frame.clone());
            }
            node = frame.pop();
        }

        for frame in while_frames.iter().rev() {
            let Rule::BeginWhile(rule) = compiled.rule(frame.rule_id()) else {
                continue;
            };
            let anchor = AnchorActive::new(is_first_line, anchor_position, line_pos);
            let found = self
                .while_pattern_set(frame.rule_id(), frame.end_rule(), anchor)
                .find_at(line, line_pos);

            match found {
                Some(m) => {
                    log::trace!("[check_while_conditions] rule {} continues at {}", *frame.rule_id(), m.start);
                    tokens.produce(frame, m.start);
                    self.handle_captures(line, is_first_line, frame, tokens, &rule.while_captures, &m.capture_pos);
                    tokens.produce(frame, m.end);
                    anchor_position = Some(m.end);
                    if m.end > line_pos {
                        line_pos = m.end;
                        is_first_line = false;
                    }
                }
                None => {
                    log::debug!("[check_while_conditions] rule {} stops", *frame.rule_id());
                    stack = frame.safe_pop();
                    break;
                }
            }
        }

        WhileCheckResult {
            stack,
            line_pos,
            anchor_position,
            is_first_line,
        }
    }

    /// Tokenizes `line` from `line_pos` until its end or until `deadline` is reached.
    ///
    /// Returns the state at the end of the line and whether the deadline stopped it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn tokenize_string(
        &mut self,
        line: &SourceLine,
        mut is_first_line: bool,
        mut line_pos: usize,
        mut stack: Arc<StackElement>,
        tokens: &mut LineTokens,
        check_while_conditions: bool,
        deadline: Option<Instant>,
    ) -> (Arc<StackElement>, bool) {
        let compiled = self.ctx.compiled;
        let attributes = self.ctx.attributes;
        let line_len = line.len();
        let mut anchor_position = None;

        if check_while_conditions {
            let result = self.check_while_conditions(line, is_first_line, line_pos, stack, tokens);
            stack = result.stack;
            line_pos = result.line_pos;
            is_first_line = result.is_first_line;
            anchor_position = result.anchor_position;
        }

        loop {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                log::debug!("[tokenize_string] time limit reached at {line_pos}");
                tokens.produce(&stack, line_len);
                return (stack, true);
            }

            log::trace!("[tokenize_string] scanning {line_pos}: {:?}", &line.as_str()[line_pos..]);
            let Some(m) = self.match_rule_or_injections(line, is_first_line, line_pos, &stack, anchor_position)
            else {
                log::trace!("[tokenize_string] no more matches");
                tokens.produce(&stack, line_len);
                return (stack, false);
            };

            let has_advanced = m.end > line_pos;

            if m.rule_id == RuleId::END {
                // Only begin/end rules have an end pattern in their set
                let end_captures: &[Option<RuleId>] = match compiled.rule(stack.rule_id()) {
                    Rule::BeginEnd(rule) => &rule.end_captures,
                    _ => &[],
                };
                log::debug!("[tokenize_string] end of rule {} at {}..{}", *stack.rule_id(), m.start, m.end);
                tokens.produce(&stack, m.start);
                stack = stack.with_content_name_scopes(stack.name_scopes().clone());
                self.handle_captures(line, is_first_line, &stack, tokens, end_captures, &m.capture_pos);
                tokens.produce(&stack, m.end);

                let popped = stack;
                stack = popped.safe_pop();
                anchor_position = popped.anchor_pos();

                if !has_advanced && popped.enter_pos() == Some(line_pos) {
                    log::warn!("Grammar is in an endless loop: pushed and popped a rule without advancing");
                    // Keep the rule pushed and give up on the rest of the line
                    stack = popped;
                    tokens.produce(&stack, line_len);
                    return (stack, false);
                }
            } else {
                let rule = compiled.rule(m.rule_id);
                log::debug!("[tokenize_string] rule {} matched at {}..{}", *m.rule_id, m.start, m.end);
                tokens.produce(&stack, m.start);

                let before_push = stack.clone();
                let name = self.ctx.resolve_name(rule.name(), line.as_str(), &m.capture_pos);
                let name_scopes = stack.content_name_scopes().push(name.as_deref(), &attributes);
                stack = stack.push(
                    m.rule_id,
                    Some(line_pos),
                    anchor_position,
                    m.end == line_len,
                    name_scopes.clone(),
                );

                match rule {
                    Rule::BeginEnd(rule) => {
                        self.handle_captures(line, is_first_line, &stack, tokens, &rule.begin_captures, &m.capture_pos);
                        tokens.produce(&stack, m.end);
                        anchor_position = Some(m.end);

                        let content_name =
                            self.ctx
                                .resolve_name(rule.content_name.as_ref(), line.as_str(), &m.capture_pos);
                        stack = stack.with_content_name_scopes(name_scopes.push(content_name.as_deref(), &attributes));

                        if rule.end_has_backrefs {
                            let end = resolve_backreferences(compiled.regex(rule.end).source(), line.as_str(), &m.capture_pos);
                            stack = stack.with_end_rule(Arc::from(end.as_ref()));
                        }

                        if !has_advanced && before_push.has_same_rule_as(&stack) {
                            log::warn!("Grammar is in an endless loop: pushed the same begin/end rule without advancing");
                            stack = stack.safe_pop();
                            tokens.produce(&stack, line_len);
                            return (stack, false);
                        }
                    }
                    Rule::BeginWhile(rule) => {
                        self.handle_captures(line, is_first_line, &stack, tokens, &rule.begin_captures, &m.capture_pos);
                        tokens.produce(&stack, m.end);
                        anchor_position = Some(m.end);

                        let content_name =
                            self.ctx
                                .resolve_name(rule.content_name.as_ref(), line.as_str(), &m.capture_pos);
                        stack = stack.with_content_name_scopes(name_scopes.push(content_name.as_deref(), &attributes));

                        if rule.while_has_backrefs {
                            let while_ =
                                resolve_backreferences(compiled.regex(rule.while_).source(), line.as_str(), &m.capture_pos);
                            stack = stack.with_end_rule(Arc::from(while_.as_ref()));
                        }

                        if !has_advanced && before_push.has_same_rule_as(&stack) {
                            log::warn!("Grammar is in an endless loop: pushed the same begin/while rule without advancing");
                            stack = stack.safe_pop();
                            tokens.produce(&stack, line_len);
                            return (stack, false);
                        }
                    }
                    _ => {
                        let captures: &[Option<RuleId>] = match rule {
                            Rule::Match(rule) => &rule.captures,
                            _ => &[],
                        };
                        self.handle_captures(line, is_first_line, &stack, tokens, captures, &m.capture_pos);
                        tokens.produce(&stack, m.end);
                        // A match rule is only on the stack for the duration of its captures
                        stack = stack.safe_pop();

                        if !has_advanced {
                            log::warn!("Match rule didn't advance, safe_pop and stop");
                            stack = stack.safe_pop();
                            tokens.produce(&stack, line_len);
                            return (stack, false);
                        }
                    }
                }
            }

            if m.end > line_pos {
                line_pos = m.end;
                is_first_line = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_utils::{grammar, render, render_lines};

    #[test]
    fn tokens_cover_the_line() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {"match": "\\d+", "name": "constant.numeric"},
                {"match": "[a-z]+", "name": "variable"}
            ]
        }"##,
        );
        let result = grammar.tokenize_line("ab 12 cd", None, None);
        let mut pos = 0;
        for token in &result.tokens {
            assert_eq!(token.start, pos);
            assert!(token.end > token.start);
            pos = token.end;
        }
        assert_eq!(pos, 8);
        insta::assert_snapshot!(render("ab 12 cd", &result.tokens), @r"
        0..2 'ab' source.x variable
        2..3 ' ' source.x
        3..5 '12' source.x constant.numeric
        5..6 ' ' source.x
        6..8 'cd' source.x variable
        ");
    }

    #[test]
    fn earliest_match_wins_then_declaration_order() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {"match": "b", "name": "late"},
                {"match": "ab", "name": "first.declared"},
                {"match": "a", "name": "second.declared"}
            ]
        }"##,
        );
        let result = grammar.tokenize_line("ab", None, None);
        insta::assert_snapshot!(render("ab", &result.tokens), @"0..2 'ab' source.x first.declared");
    }

    #[test]
    fn begin_end_carries_over_lines() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {
                    "begin": "/\\*", "end": "\\*/",
                    "name": "comment.block",
                    "contentName": "comment.content"
                }
            ]
        }"##,
        );
        let lines = ["a /* b", "c */ d"];
        insta::assert_snapshot!(render_lines(&grammar, &lines), @r"
        0..2 'a ' source.x
        2..4 '/*' source.x comment.block
        4..6 ' b' source.x comment.block comment.content
        ---
        0..2 'c ' source.x comment.block comment.content
        2..4 '*/' source.x comment.block
        4..6 ' d' source.x
        ");
    }

    #[test]
    fn states_are_balanced_and_deterministic() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {"begin": "\\(", "end": "\\)", "name": "meta.parens", "patterns": [{"include": "$self"}]}
            ]
        }"##,
        );
        let first = grammar.tokenize_line("((a)", None, None);
        assert_eq!(first.next_state.depth(), 2);
        let again = grammar.tokenize_line("((a)", None, None);
        assert_eq!(first.tokens, again.tokens);
        assert_eq!(*first.next_state, *again.next_state);

        let second = grammar.tokenize_line(")", Some(&first.next_state), None);
        assert_eq!(second.next_state.depth(), 1);
        insta::assert_snapshot!(render(")", &second.tokens), @"0..1 ')' source.x meta.parens");
    }

    #[test]
    fn end_pattern_with_backreferences() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {"begin": "<<(\\w+)", "end": "^\\1$", "name": "string.heredoc"}
            ]
        }"##,
        );
        let lines = ["<<EOF", "EOT", "EOF", "after"];
        insta::assert_snapshot!(render_lines(&grammar, &lines), @r"
        0..5 '<<EOF' source.x string.heredoc
        ---
        0..3 'EOT' source.x string.heredoc
        ---
        0..3 'EOF' source.x string.heredoc
        ---
        0..5 'after' source.x
        ");
    }

    #[test]
    fn captures_nest_and_get_retokenized() {
        // Retokenized captures start again from the scopes of the match, not of the
        // enclosing captures
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {
                    "match": "(let) ((\\w+)=(\\d+))",
                    "captures": {
                        "1": {"name": "keyword"},
                        "2": {"name": "meta.binding"},
                        "3": {"name": "variable"},
                        "4": {"patterns": [{"match": "\\d", "name": "digit"}]}
                    }
                }
            ]
        }"##,
        );
        let result = grammar.tokenize_line("let a=12", None, None);
        insta::assert_snapshot!(render("let a=12", &result.tokens), @r"
        0..3 'let' source.x keyword
        3..4 ' ' source.x
        4..5 'a' source.x meta.binding variable
        5..6 '=' source.x meta.binding
        6..7 '1' source.x digit
        7..8 '2' source.x digit
        ");
    }

    #[test]
    fn while_rules_stop_when_the_condition_fails() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {
                    "begin": "^>", "while": "^>",
                    "name": "markup.quote",
                    "patterns": [{"match": "\\w+", "name": "word"}]
                }
            ]
        }"##,
        );
        let lines = ["> a", "> b", "c"];
        insta::assert_snapshot!(render_lines(&grammar, &lines), @r"
        0..1 '>' source.x markup.quote
        1..2 ' ' source.x markup.quote
        2..3 'a' source.x markup.quote word
        ---
        0..1 '>' source.x markup.quote
        1..2 ' ' source.x markup.quote
        2..3 'b' source.x markup.quote word
        ---
        0..1 'c' source.x
        ");
    }

    #[test]
    fn injections_apply_where_their_selector_matches() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {"begin": "\"", "end": "\"", "name": "string.quoted"}
            ],
            "injections": {
                "L:string.quoted": {"patterns": [{"match": "TODO", "name": "keyword.todo"}]}
            }
        }"##,
        );
        let result = grammar.tokenize_line("TODO \"TODO\"", None, None);
        insta::assert_snapshot!(render("TODO \"TODO\"", &result.tokens), @r#"
        0..5 'TODO ' source.x
        5..6 '"' source.x string.quoted
        6..10 'TODO' source.x string.quoted keyword.todo
        10..11 '"' source.x string.quoted
        "#);
    }

    #[test]
    fn left_injections_win_ties() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [{"match": "x", "name": "from.grammar"}],
            "injections": {
                "L:source.x": {"patterns": [{"match": "x", "name": "from.left"}]},
                "R:source.x": {"patterns": [{"match": "x", "name": "from.right"}]}
            }
        }"##,
        );
        let result = grammar.tokenize_line("x", None, None);
        insta::assert_snapshot!(render("x", &result.tokens), @"0..1 'x' source.x from.left");
    }

    #[test]
    fn empty_matches_do_not_loop() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [
                {"match": "(?=a)", "name": "empty"},
                {"begin": "(?=b)", "end": "(?=b)", "name": "meta.empty"}
            ]
        }"##,
        );
        let result = grammar.tokenize_line("ab", None, None);
        assert_eq!(result.tokens.last().map(|t| t.end), Some(2));
        let result = grammar.tokenize_line("b", None, None);
        assert_eq!(result.tokens.last().map(|t| t.end), Some(1));
    }

    #[test]
    fn time_limit_stops_early_and_fills_the_line() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [{"match": "\\w", "name": "word"}]
        }"##,
        );
        let result = grammar.tokenize_line("abc", None, Some(Duration::ZERO));
        assert!(result.stopped_early);
        assert_eq!(result.tokens.len(), 1);
        assert_eq!((result.tokens[0].start, result.tokens[0].end), (0, 3));

        let result = grammar.tokenize_line("abc", None, None);
        assert!(!result.stopped_early);
    }

    #[test]
    fn first_line_anchor_only_matches_on_the_first_line() {
        let grammar = grammar(
            r##"{
            "scopeName": "source.x",
            "patterns": [{"match": "\\Aa", "name": "first"}]
        }"##,
        );
        let lines = ["a", "a"];
        insta::assert_snapshot!(render_lines(&grammar, &lines), @r"
        0..1 'a' source.x first
        ---
        0..1 'a' source.x
        ");
    }
}
