use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use crate::grammars::backend::{CaptureSpans, RegexBackend};
use crate::grammars::backrefs::{has_capture_references, replace_captures};
use crate::grammars::injections::{InjectionPriority, SelectorMatcher, parse_selector};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::regex::Regex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    /// Marks the end pattern of the current begin/end rule in a pattern set
    pub const END: RuleId = RuleId(u32::MAX);
    /// Marks the while pattern of a begin/while rule
    pub const WHILE: RuleId = RuleId(u32::MAX - 1);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u32);

impl Deref for RegexId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// per vscode-textmate:
///  Allowed values:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * Relative scope reference, e.g. `#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Reference {
    Self_,
    Base,
    Local(String),
    OtherComplete(String),
    OtherSpecific(String, String),
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        match value {
            "$self" => Self::Self_,
            "$base" => Self::Base,
            s => match s.split_once('#') {
                None => Self::OtherComplete(s.to_string()),
                Some(("", rule)) => Self::Local(rule.to_string()),
                Some((scope, rule)) => Self::OtherSpecific(scope.to_string(), rule.to_string()),
            },
        }
    }
}

/// A `name` or `contentName`, which can refer to captured text with `$1` or
/// `${1:/downcase}`.
#[derive(Clone, PartialEq, Eq)]
pub struct RuleName {
    source: Arc<str>,
    is_capturing: bool,
}

impl RuleName {
    pub fn new(source: &str) -> Self {
        Self {
            source: Arc::from(source),
            is_capturing: has_capture_references(source),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_capturing(&self) -> bool {
        self.is_capturing
    }

    /// The name with captures replaced, `spans` being from a match on `text`
    pub fn resolve<'a>(&'a self, text: &str, spans: &CaptureSpans) -> Cow<'a, str> {
        if self.is_capturing {
            replace_captures(&self.source, text, spans)
        } else {
            Cow::Borrowed(&self.source)
        }
    }
}

impl fmt::Debug for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.source)
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub regex: RegexId,
    pub captures: Vec<Option<RuleId>>,
}

#[derive(Debug, Clone)]
pub struct IncludeOnly {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

#[derive(Debug, Clone)]
pub struct BeginEnd {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

#[derive(Debug, Clone)]
pub struct BeginWhile {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexId,
    pub while_has_backrefs: bool,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

/// A capture group of a match, begin, end or while pattern
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    /// Set when the capture has its own `patterns`: the captured text is then
    /// tokenized again with that rule
    pub retokenize: Option<RuleId>,
}

#[derive(Debug, Clone)]
pub enum Rule {
    Match(Match),
    IncludeOnly(IncludeOnly),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
    Capture(Capture),
    /// Placeholder while a rule is being compiled
    Noop,
}

static NOOP_RULE: Rule = Rule::Noop;

impl Rule {
    pub fn id(&self) -> Option<RuleId> {
        match self {
            Rule::Match(r) => Some(r.id),
            Rule::IncludeOnly(r) => Some(r.id),
            Rule::BeginEnd(r) => Some(r.id),
            Rule::BeginWhile(r) => Some(r.id),
            Rule::Capture(r) => Some(r.id),
            Rule::Noop => None,
        }
    }

    pub fn name(&self) -> Option<&RuleName> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::IncludeOnly(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Capture(r) => r.name.as_ref(),
            Rule::Noop => None,
        }
    }

    pub fn content_name(&self) -> Option<&RuleName> {
        match self {
            Rule::IncludeOnly(r) => r.content_name.as_ref(),
            Rule::BeginEnd(r) => r.content_name.as_ref(),
            Rule::BeginWhile(r) => r.content_name.as_ref(),
            Rule::Capture(r) => r.content_name.as_ref(),
            Rule::Match(_) | Rule::Noop => None,
        }
    }

    /// The child patterns of rules that have some
    pub fn patterns(&self) -> &[RuleId] {
        match self {
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            _ => &[],
        }
    }

    /// The regex this rule contributes when it appears in a pattern list
    pub(crate) fn entry_regex(&self) -> Option<RegexId> {
        match self {
            Rule::Match(r) => Some(r.regex),
            Rule::BeginEnd(r) => Some(r.begin),
            Rule::BeginWhile(r) => Some(r.begin),
            _ => None,
        }
    }

    /// Rules whose patterns all failed to resolve are dropped from the lists including them
    fn is_empty_after_missing_patterns(&self) -> bool {
        match self {
            Rule::IncludeOnly(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginEnd(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginWhile(r) => r.has_missing_patterns && r.patterns.is_empty(),
            _ => false,
        }
    }
}

/// An injection rule with the selector deciding where it applies
#[derive(Debug, Clone)]
pub struct Injection {
    pub selector: String,
    pub matcher: SelectorMatcher,
    pub priority: InjectionPriority,
    pub rule_id: RuleId,
}

/// Errors that can occur during grammar compilation
#[derive(Debug)]
pub enum CompileError {
    InvalidRegex { pattern: String, message: String },
    MissingGrammar { scope: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::InvalidRegex { pattern, message } => {
                write!(f, "Invalid regex pattern '{pattern}': {message}")
            }
            CompileError::MissingGrammar { scope } => {
                write!(f, "No grammar provided for <{scope}>")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// A grammar with all the grammars it includes compiled in a single rule graph.
///
/// Rules are addressed by their [`RuleId`], rules coming from other grammars share
/// the same id space.
#[derive(Debug)]
pub struct CompiledGrammar {
    pub scope_name: String,
    pub root: RuleId,
    pub rules: Vec<Rule>,
    pub regexes: Vec<Regex>,
    pub injections: Vec<Injection>,
    /// Flattened pattern lists, filled on first use
    collected: Vec<OnceLock<Arc<[RuleId]>>>,
}

impl CompiledGrammar {
    /// Compiles the grammar `scope_name` found in `grammars`.
    ///
    /// `grammars` must contain every grammar it depends on, missing ones are skipped.
    /// `injectors` are the scope names of the grammars injecting into this one.
    pub fn compile(
        scope_name: &str,
        grammars: &HashMap<String, Arc<RawGrammar>>,
        injectors: &[String],
        backend: &dyn RegexBackend,
    ) -> Result<Self, CompileError> {
        let grammar = grammars
            .get(scope_name)
            .ok_or_else(|| CompileError::MissingGrammar {
                scope: scope_name.to_string(),
            })?;

        let mut compiler = RuleCompiler {
            grammars,
            backend,
            rules: Vec::new(),
            regexes: Vec::new(),
            memo: HashMap::new(),
            roots: HashMap::new(),
        };

        let base_ctx = Context::new(grammar, grammar);
        let root = compiler.compile_root(&base_ctx)?;

        let mut injections = Vec::new();
        if let Some(raw_injections) = &grammar.injections {
            for (selector, rule) in raw_injections {
                let rule_id = compiler.compile_rule(rule, &base_ctx)?;
                push_injections(&mut injections, selector, rule_id);
            }
        }
        for injector in injectors {
            let Some(injector_grammar) = grammars.get(injector.as_str()) else {
                log::warn!("Injection grammar {injector} is not loaded");
                continue;
            };
            let Some(selector) = &injector_grammar.injection_selector else {
                continue;
            };
            let ctx = Context::new(injector_grammar, grammar);
            let rule_id = compiler.compile_root(&ctx)?;
            push_injections(&mut injections, selector, rule_id);
        }
        // Stable so declaration order is kept within a priority
        injections.sort_by_key(|i| i.priority);

        log::debug!(
            "Compiled {scope_name}: {} rules, {} regexes, {} injections",
            compiler.rules.len(),
            compiler.regexes.len(),
            injections.len()
        );

        let collected = (0..compiler.rules.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            scope_name: scope_name.to_string(),
            root,
            rules: compiler.rules,
            regexes: compiler.regexes,
            injections,
            collected,
        })
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id.index()).unwrap_or(&NOOP_RULE)
    }

    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[*id as usize]
    }

    /// Candidate rules when scanning inside `rule_id`: the match and begin rules of its
    /// patterns, with include only rules flattened, in declaration order.
    pub fn collected_patterns(&self, rule_id: RuleId) -> Arc<[RuleId]> {
        let Some(slot) = self.collected.get(rule_id.index()) else {
            return Arc::from([]);
        };
        slot.get_or_init(|| {
            let mut out = Vec::new();
            let mut visited = HashSet::new();
            visited.insert(rule_id);
            self.collect_into(self.rule(rule_id).patterns(), &mut visited, &mut out);
            Arc::from(out)
        })
        .clone()
    }

    fn collect_into(&self, patterns: &[RuleId], visited: &mut HashSet<RuleId>, out: &mut Vec<RuleId>) {
        for &id in patterns {
            match self.rule(id) {
                Rule::Match(_) | Rule::BeginEnd(_) | Rule::BeginWhile(_) => out.push(id),
                Rule::IncludeOnly(include) => {
                    if visited.insert(id) {
                        self.collect_into(&include.patterns, visited, out);
                    }
                }
                Rule::Capture(_) | Rule::Noop => (),
            }
        }
    }
}

fn push_injections(out: &mut Vec<Injection>, selector: &str, rule_id: RuleId) {
    for compiled in parse_selector(selector) {
        out.push(Injection {
            selector: selector.to_string(),
            matcher: compiled.matcher,
            priority: compiled.priority,
            rule_id,
        });
    }
}

/// Where a rule is compiled: the grammar it belongs to, the grammar `$base` refers to and
/// the repositories visible from it, outermost first.
#[derive(Clone)]
struct Context<'g> {
    grammar: &'g RawGrammar,
    base: &'g RawGrammar,
    repositories: Vec<&'g HashMap<String, RawRule>>,
}

impl<'g> Context<'g> {
    fn new(grammar: &'g RawGrammar, base: &'g RawGrammar) -> Self {
        Self {
            grammar,
            base,
            repositories: grammar.repository.iter().collect(),
        }
    }

    fn with_repository(&self, repository: Option<&'g HashMap<String, RawRule>>) -> Cow<'_, Self> {
        match repository {
            Some(repo) => {
                let mut ctx = self.clone();
                ctx.repositories.push(repo);
                Cow::Owned(ctx)
            }
            None => Cow::Borrowed(self),
        }
    }

    fn lookup(&self, name: &str) -> Option<&'g RawRule> {
        self.repositories.iter().rev().find_map(|repo| repo.get(name))
    }
}

struct RuleCompiler<'g> {
    grammars: &'g HashMap<String, Arc<RawGrammar>>,
    backend: &'g dyn RegexBackend,
    rules: Vec<Rule>,
    regexes: Vec<Regex>,
    /// Raw rules are compiled once, wherever they are included from
    memo: HashMap<*const RawRule, RuleId>,
    /// Root rules of each grammar, by scope name
    roots: HashMap<&'g str, RuleId>,
}

impl<'g> RuleCompiler<'g> {
    fn reserve(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        // push a no-op to reserve its spot
        self.rules.push(Rule::Noop);
        id
    }

    /// The root rule of `ctx.grammar`, equivalent to a rule with its top-level patterns
    fn compile_root(&mut self, ctx: &Context<'g>) -> Result<RuleId, CompileError> {
        let grammar = ctx.grammar;
        if let Some(id) = self.roots.get(grammar.scope_name.as_str()) {
            return Ok(*id);
        }
        let id = self.reserve();
        self.roots.insert(grammar.scope_name.as_str(), id);

        let (patterns, has_missing_patterns) = self.compile_patterns(Some(&grammar.patterns), ctx)?;
        self.rules[id.index()] = Rule::IncludeOnly(IncludeOnly {
            id,
            name: Some(RuleName::new(&grammar.scope_name)),
            content_name: None,
            patterns,
            has_missing_patterns,
        });
        Ok(id)
    }

    fn compile_rule(&mut self, raw: &'g RawRule, ctx: &Context<'g>) -> Result<RuleId, CompileError> {
        let key = raw as *const RawRule;
        if let Some(id) = self.memo.get(&key) {
            return Ok(*id);
        }
        let id = self.reserve();
        self.memo.insert(key, id);

        let name = raw.name.as_deref().map(RuleName::new);
        let content_name = raw.content_name.as_deref().map(RuleName::new);
        let ctx = ctx.with_repository(raw.repository.as_ref());

        // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L389-L447
        let rule = if let Some(pat) = &raw.match_ {
            Rule::Match(Match {
                id,
                name,
                regex: self.compile_regex(pat, true)?,
                captures: self.compile_captures(raw.captures.as_ref(), &ctx)?,
            })
        } else if let Some(begin_pat) = &raw.begin {
            let begin = self.compile_regex(begin_pat, true)?;
            let begin_captures =
                self.compile_captures(raw.begin_captures.as_ref().or(raw.captures.as_ref()), &ctx)?;
            if let Some(while_pat) = &raw.while_ {
                let while_ = self.compile_regex(while_pat, false)?;
                let while_captures =
                    self.compile_captures(raw.while_captures.as_ref().or(raw.captures.as_ref()), &ctx)?;
                let (patterns, has_missing_patterns) = self.compile_patterns(raw.patterns.as_ref(), &ctx)?;
                Rule::BeginWhile(BeginWhile {
                    id,
                    name,
                    content_name,
                    begin,
                    begin_captures,
                    while_,
                    while_has_backrefs: self.regexes[*while_ as usize].has_backreferences(),
                    while_captures,
                    patterns,
                    has_missing_patterns,
                })
            } else {
                // A begin without an end never closes
                let end_pat = raw.end.as_deref().unwrap_or("\u{FFFF}");
                let end = self.compile_regex(end_pat, false)?;
                let end_captures =
                    self.compile_captures(raw.end_captures.as_ref().or(raw.captures.as_ref()), &ctx)?;
                let (patterns, has_missing_patterns) = self.compile_patterns(raw.patterns.as_ref(), &ctx)?;
                Rule::BeginEnd(BeginEnd {
                    id,
                    name,
                    content_name,
                    begin,
                    begin_captures,
                    end,
                    end_has_backrefs: self.regexes[*end as usize].has_backreferences(),
                    end_captures,
                    apply_end_pattern_last: raw.apply_end_pattern_last,
                    patterns,
                    has_missing_patterns,
                })
            }
        } else {
            // vscode-textmate does something funny here:
            // - if patterns are NOT present and includes are, it moves includes to patterns;
            // - however, if patterns ARE present, includes are ignored
            // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L404
            let (patterns, has_missing_patterns) = match (&raw.patterns, &raw.include) {
                (None, Some(include)) => {
                    let resolved = self.compile_include(include, &ctx)?;
                    let missing = resolved.is_none();
                    (resolved.into_iter().collect(), missing)
                }
                _ => self.compile_patterns(raw.patterns.as_ref(), &ctx)?,
            };
            Rule::IncludeOnly(IncludeOnly {
                id,
                name,
                content_name,
                patterns,
                has_missing_patterns,
            })
        };

        self.rules[id.index()] = rule;
        Ok(id)
    }

    /// Patterns with back-references can only be compiled once the begin matched
    fn compile_regex(&mut self, pattern: &str, always_static: bool) -> Result<RegexId, CompileError> {
        let regex = Regex::new(pattern);
        if always_static || !regex.has_backreferences() {
            regex
                .validate(self.backend)
                .map_err(|message| CompileError::InvalidRegex {
                    pattern: pattern.to_string(),
                    message,
                })?;
        }
        let id = RegexId(self.regexes.len() as u32);
        self.regexes.push(regex);
        Ok(id)
    }

    fn compile_captures(
        &mut self,
        captures: Option<&'g RawCaptures>,
        ctx: &Context<'g>,
    ) -> Result<Vec<Option<RuleId>>, CompileError> {
        let Some(captures) = captures else {
            return Ok(Vec::new());
        };
        let numbered: Vec<(usize, &'g RawRule)> = captures
            .iter()
            .filter_map(|(key, rule)| key.trim().parse::<usize>().ok().map(|i| (i, rule)))
            .collect();
        let Some(max_capture) = numbered.iter().map(|(i, _)| *i).max() else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Option<RuleId>> = vec![None; max_capture + 1];
        for (index, raw) in numbered {
            let retokenize = if raw.patterns.is_some() {
                Some(self.compile_rule(raw, ctx)?)
            } else {
                None
            };
            let id = self.reserve();
            self.rules[id.index()] = Rule::Capture(Capture {
                id,
                name: raw.name.as_deref().map(RuleName::new),
                content_name: raw.content_name.as_deref().map(RuleName::new),
                retokenize,
            });
            out[index] = Some(id);
        }

        Ok(out)
    }

    /// Returns the compiled patterns and whether some of them could not be resolved
    fn compile_patterns(
        &mut self,
        patterns: Option<&'g Vec<RawRule>>,
        ctx: &Context<'g>,
    ) -> Result<(Vec<RuleId>, bool), CompileError> {
        let Some(patterns) = patterns else {
            return Ok((Vec::new(), false));
        };
        let mut out = Vec::with_capacity(patterns.len());

        for raw in patterns {
            // vscode ignores other rule contents is there's an include
            // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L495
            let rule_id = match &raw.include {
                Some(include) => self.compile_include(include, ctx)?,
                None => Some(self.compile_rule(raw, ctx)?),
            };
            let Some(rule_id) = rule_id else {
                continue;
            };
            if self.rules[rule_id.index()].is_empty_after_missing_patterns() {
                continue;
            }
            out.push(rule_id);
        }

        let has_missing = out.len() != patterns.len();
        Ok((out, has_missing))
    }

    fn compile_include(&mut self, include: &str, ctx: &Context<'g>) -> Result<Option<RuleId>, CompileError> {
        let grammars = self.grammars;
        let resolved = match Reference::from(include) {
            Reference::Self_ => Some(self.compile_root(&Context::new(ctx.grammar, ctx.base))?),
            Reference::Base => Some(self.compile_root(&Context::new(ctx.base, ctx.base))?),
            Reference::Local(name) => match ctx.lookup(&name) {
                Some(raw) => Some(self.compile_rule(raw, ctx)?),
                None => None,
            },
            Reference::OtherComplete(scope) => match grammars.get(scope.as_str()) {
                Some(external) => Some(self.compile_root(&Context::new(external, ctx.base))?),
                None => None,
            },
            Reference::OtherSpecific(scope, name) => {
                match grammars.get(scope.as_str()).and_then(|g| Some((g, g.repository_rule(&name)?))) {
                    Some((external, raw)) => {
                        Some(self.compile_rule(raw, &Context::new(external, ctx.base))?)
                    }
                    None => None,
                }
            }
        };

        if resolved.is_none() {
            log::warn!(
                "Could not resolve include {include:?} in {}, skipping it",
                ctx.grammar.scope_name
            );
        }
        Ok(resolved)
    }
}
