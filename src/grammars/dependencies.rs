//! Finds every grammar a grammar needs: the ones it includes, transitively, and the
//! ones injecting into them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::OcraResult;
use crate::grammars::compiled::Reference;
use crate::grammars::raw::{RawGrammar, RawRule};

/// Where raw grammars come from, usually the registry
pub(crate) trait GrammarLookup {
    /// `Ok(None)` if nothing is registered under that scope name
    fn lookup(&self, scope_name: &str) -> OcraResult<Option<Arc<RawGrammar>>>;
    /// Scope names of the grammars injecting into `scope_name`
    fn injections(&self, scope_name: &str) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Dependency {
    /// A whole grammar, eg `source.css`
    Full(String),
    /// A single rule of a grammar repository, eg `source.css#rule-list`
    Partial(String, String),
}

impl Dependency {
    fn scope_name(&self) -> &str {
        match self {
            Dependency::Full(scope) | Dependency::Partial(scope, _) => scope,
        }
    }
}

#[derive(Clone)]
struct Context<'a> {
    base: &'a RawGrammar,
    grammar: &'a RawGrammar,
    repositories: Vec<&'a HashMap<String, RawRule>>,
}

impl<'a> Context<'a> {
    fn lookup(&self, name: &str) -> Option<&'a RawRule> {
        self.repositories.iter().rev().find_map(|repo| repo.get(name))
    }
}

/// References found while walking a batch of grammars
#[derive(Default)]
struct ReferenceCollector {
    references: Vec<Dependency>,
    seen: HashSet<Dependency>,
    visited_rules: HashSet<*const RawRule>,
}

impl ReferenceCollector {
    fn add(&mut self, dependency: Dependency) {
        if self.seen.insert(dependency.clone()) {
            self.references.push(dependency);
        }
    }

    fn collect_top_level<'a>(&mut self, base: &'a RawGrammar, grammar: &'a RawGrammar) {
        let ctx = Context {
            base,
            grammar,
            repositories: grammar.repository.iter().collect(),
        };
        self.collect_rules(grammar.patterns.iter(), &ctx);
        if let Some(injections) = &grammar.injections {
            self.collect_rules(injections.values(), &ctx);
        }
    }

    fn collect_repository_rule<'a>(&mut self, name: &str, ctx: &Context<'a>) {
        if let Some(rule) = ctx.lookup(name) {
            self.collect_rules(std::iter::once(rule), ctx);
        }
    }

    fn collect_rules<'a>(&mut self, rules: impl Iterator<Item = &'a RawRule>, ctx: &Context<'a>) {
        for rule in rules {
            if !self.visited_rules.insert(rule as *const RawRule) {
                continue;
            }

            let mut rule_ctx = ctx.clone();
            if let Some(repository) = &rule.repository {
                rule_ctx.repositories.push(repository);
            }
            if let Some(patterns) = &rule.patterns {
                self.collect_rules(patterns.iter(), &rule_ctx);
            }
            for captures in [
                &rule.captures,
                &rule.begin_captures,
                &rule.end_captures,
                &rule.while_captures,
            ]
            .into_iter()
            .flatten()
            {
                self.collect_rules(captures.values(), &rule_ctx);
            }

            let Some(include) = &rule.include else {
                continue;
            };
            match Reference::from(include.as_str()) {
                Reference::Base => self.collect_top_level(ctx.base, ctx.base),
                Reference::Self_ => self.collect_top_level(ctx.base, ctx.grammar),
                Reference::Local(name) => self.collect_repository_rule(&name, &rule_ctx),
                Reference::OtherComplete(scope) => {
                    match local_grammar(&scope, ctx) {
                        Some(grammar) => self.collect_top_level(ctx.base, grammar),
                        None => self.add(Dependency::Full(scope)),
                    }
                }
                Reference::OtherSpecific(scope, name) => match local_grammar(&scope, ctx) {
                    Some(grammar) => {
                        let grammar_ctx = Context {
                            base: ctx.base,
                            grammar,
                            repositories: grammar.repository.iter().collect(),
                        };
                        self.collect_repository_rule(&name, &grammar_ctx);
                    }
                    None => self.add(Dependency::Partial(scope, name)),
                },
            }
        }
    }
}

/// Grammars already at hand in that context
fn local_grammar<'a>(scope: &str, ctx: &Context<'a>) -> Option<&'a RawGrammar> {
    if scope == ctx.grammar.scope_name {
        Some(ctx.grammar)
    } else if scope == ctx.base.scope_name {
        Some(ctx.base)
    } else {
        None
    }
}

/// Breadth first walk of the grammars reachable from an initial scope.
///
/// A whole grammar is only ever queued once, and a single repository rule of a grammar
/// only if neither the whole grammar nor that rule were queued before, so cycles
/// between grammars terminate.
struct ScopeDependencyProcessor {
    initial_scope: String,
    seen_full: HashSet<String>,
    seen_partial: HashSet<(String, String)>,
    queue: Vec<Dependency>,
}

impl ScopeDependencyProcessor {
    fn new(initial_scope: &str) -> Self {
        Self {
            initial_scope: initial_scope.to_string(),
            seen_full: HashSet::from([initial_scope.to_string()]),
            seen_partial: HashSet::new(),
            queue: vec![Dependency::Full(initial_scope.to_string())],
        }
    }

    fn process_queue(&mut self, loaded: &HashMap<String, Arc<RawGrammar>>, lookup: &dyn GrammarLookup) {
        let queue = std::mem::take(&mut self.queue);
        let mut collector = ReferenceCollector::default();
        let Some(base) = loaded.get(&self.initial_scope) else {
            return;
        };

        for dependency in &queue {
            let Some(grammar) = loaded.get(dependency.scope_name()) else {
                continue;
            };
            match dependency {
                Dependency::Full(_) => collector.collect_top_level(base, grammar),
                Dependency::Partial(_, name) => {
                    let ctx = Context {
                        base,
                        grammar,
                        repositories: grammar.repository.iter().collect(),
                    };
                    collector.collect_repository_rule(name, &ctx);
                }
            }
            for injector in lookup.injections(dependency.scope_name()) {
                collector.add(Dependency::Full(injector));
            }
        }

        for dependency in collector.references {
            if self.seen_full.contains(dependency.scope_name()) {
                continue;
            }
            match &dependency {
                Dependency::Full(scope) => {
                    self.seen_full.insert(scope.clone());
                }
                Dependency::Partial(scope, name) => {
                    if !self.seen_partial.insert((scope.clone(), name.clone())) {
                        continue;
                    }
                }
            }
            self.queue.push(dependency);
        }
    }
}

/// Loads `initial_scope` and everything it depends on.
///
/// Returns `Ok(None)` if `initial_scope` itself is unknown. Missing dependencies are
/// only logged: the includes pointing to them will be skipped at compile time.
pub(crate) fn load_dependencies(
    initial_scope: &str,
    lookup: &dyn GrammarLookup,
) -> OcraResult<Option<HashMap<String, Arc<RawGrammar>>>> {
    let mut loaded = HashMap::new();
    let Some(initial) = lookup.lookup(initial_scope)? else {
        return Ok(None);
    };
    loaded.insert(initial_scope.to_string(), initial);

    let mut processor = ScopeDependencyProcessor::new(initial_scope);
    while !processor.queue.is_empty() {
        for dependency in &processor.queue {
            let scope = dependency.scope_name();
            if loaded.contains_key(scope) {
                continue;
            }
            match lookup.lookup(scope)? {
                Some(grammar) => {
                    log::debug!("Loaded {scope} as a dependency of {initial_scope}");
                    loaded.insert(scope.to_string(), grammar);
                }
                None => log::debug!("Grammar {scope} needed by {initial_scope} is not registered"),
            }
        }
        processor.process_queue(&loaded, lookup);
    }

    Ok(Some(loaded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeLookup {
        grammars: HashMap<String, Arc<RawGrammar>>,
        injections: HashMap<String, Vec<String>>,
        requested: RefCell<Vec<String>>,
    }

    impl FakeLookup {
        fn with(jsons: &[&str]) -> Self {
            let grammars = jsons
                .iter()
                .map(|json| {
                    let g = RawGrammar::from_json(json).unwrap();
                    (g.scope_name.clone(), Arc::new(g))
                })
                .collect();
            Self {
                grammars,
                ..Default::default()
            }
        }
    }

    impl GrammarLookup for FakeLookup {
        fn lookup(&self, scope_name: &str) -> OcraResult<Option<Arc<RawGrammar>>> {
            self.requested.borrow_mut().push(scope_name.to_string());
            Ok(self.grammars.get(scope_name).cloned())
        }

        fn injections(&self, scope_name: &str) -> Vec<String> {
            self.injections.get(scope_name).cloned().unwrap_or_default()
        }
    }

    fn sorted_keys(map: &HashMap<String, Arc<RawGrammar>>) -> Vec<&str> {
        let mut keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        keys.sort();
        keys
    }

    #[test]
    fn unknown_initial_scope_is_none() {
        let lookup = FakeLookup::default();
        assert!(load_dependencies("source.x", &lookup).unwrap().is_none());
    }

    #[test]
    fn follows_includes_transitively_and_terminates_on_cycles() {
        let lookup = FakeLookup::with(&[
            r##"{"scopeName": "source.a", "patterns": [{"include": "source.b"}]}"##,
            r##"{"scopeName": "source.b", "patterns": [{"include": "source.c#x"}, {"include": "source.a"}]}"##,
            r##"{"scopeName": "source.c", "repository": {"x": {"patterns": [{"include": "source.b"}]}}}"##,
        ]);
        let loaded = load_dependencies("source.a", &lookup).unwrap().unwrap();
        assert_eq!(sorted_keys(&loaded), vec!["source.a", "source.b", "source.c"]);
        // Each grammar is looked up once
        let mut requested = lookup.requested.borrow().clone();
        requested.sort();
        assert_eq!(requested, vec!["source.a", "source.b", "source.c"]);
    }

    #[test]
    fn only_follows_reachable_repository_rules() {
        let lookup = FakeLookup::with(&[
            r##"{"scopeName": "source.a", "patterns": [{"include": "source.c#used"}]}"##,
            r##"{"scopeName": "source.b", "patterns": []}"##,
            r##"{"scopeName": "source.c", "repository": {
                "used": {"match": "x"},
                "unused": {"patterns": [{"include": "source.b"}]}
            }}"##,
        ]);
        let loaded = load_dependencies("source.a", &lookup).unwrap().unwrap();
        assert_eq!(sorted_keys(&loaded), vec!["source.a", "source.c"]);
    }

    #[test]
    fn loads_injectors_and_tolerates_missing_grammars() {
        let mut lookup = FakeLookup::with(&[
            r##"{"scopeName": "source.a", "patterns": [{"include": "source.missing"}]}"##,
            r##"{"scopeName": "text.injector", "injectionSelector": "L:source.a", "patterns": []}"##,
        ]);
        lookup
            .injections
            .insert("source.a".to_string(), vec!["text.injector".to_string()]);
        let loaded = load_dependencies("source.a", &lookup).unwrap().unwrap();
        assert_eq!(sorted_keys(&loaded), vec!["source.a", "text.injector"]);
    }
}
