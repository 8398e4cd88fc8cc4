use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::config::{GrammarConfiguration, RegistryConfig};
use crate::error::{Error, OcraResult};
use crate::grammar::Grammar;
use crate::grammars::dependencies::{GrammarLookup, load_dependencies};
use crate::grammars::{CompiledGrammar, OnigBackend, RawGrammar, RegexBackend};
use crate::themes::{RawTheme, Theme, ThemeProvider};

/// A compiled grammar, built by the first thread asking for it
#[derive(Default)]
struct CompileSlot {
    compiled: OnceLock<Arc<CompiledGrammar>>,
    lock: Mutex<()>,
}

/// The main struct in ocra.
///
/// Holds the raw grammars by scope name and the current theme, and hands out compiled
/// [`Grammar`]s. Every method takes `&self` so a registry can be shared between
/// threads behind an `Arc`.
pub struct Registry {
    // scope name -> raw grammar
    raw_grammars: papaya::HashMap<String, Arc<RawGrammar>>,
    // scope name -> file to load the raw grammar from on first use
    grammar_paths: papaya::HashMap<String, PathBuf>,
    // target scope name -> scope names of the grammars injected into it
    injections: papaya::HashMap<String, Vec<String>>,
    // scope name -> configuration used by `load_grammar`
    configurations: papaya::HashMap<String, GrammarConfiguration>,
    compiled: papaya::HashMap<String, Arc<CompileSlot>>,
    grammars: papaya::HashMap<String, Arc<Grammar>>,
    theme: Arc<ThemeProvider>,
    backend: Arc<dyn RegexBackend>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_backend(Arc::new(OnigBackend))
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry compiling its regexes with another engine than Oniguruma
    pub fn with_backend(backend: Arc<dyn RegexBackend>) -> Self {
        Self {
            raw_grammars: papaya::HashMap::new(),
            grammar_paths: papaya::HashMap::new(),
            injections: papaya::HashMap::new(),
            configurations: papaya::HashMap::new(),
            compiled: papaya::HashMap::new(),
            grammars: papaya::HashMap::new(),
            theme: Arc::new(ThemeProvider::default()),
            backend,
        }
    }

    /// Builds a registry from a configuration file content, see [`RegistryConfig`].
    /// Grammars are only read when first needed.
    pub fn from_config(config: &RegistryConfig) -> OcraResult<Self> {
        let registry = Self::new();
        for (scope_name, path) in &config.grammars {
            registry.register_grammar_path(scope_name, path);
        }
        for (target, injectors) in &config.injections {
            for injector in injectors {
                registry.add_injection(target, injector);
            }
        }
        for (scope_name, configuration) in &config.configurations {
            registry.set_grammar_configuration(scope_name, configuration.clone());
        }
        if let Some(theme) = &config.theme {
            registry.set_theme_from_path(theme)?;
        }
        Ok(registry)
    }

    /// Compiled grammars may include the grammar that changed
    fn invalidate(&self) {
        self.compiled.pin().clear();
        self.grammars.pin().clear();
    }

    fn store_raw_grammar(&self, raw: Arc<RawGrammar>) {
        for target in &raw.inject_to {
            self.push_injection(target, &raw.scope_name);
        }
        log::debug!("Registered grammar {}", raw.scope_name);
        self.raw_grammars.pin().insert(raw.scope_name.clone(), raw);
    }

    fn push_injection(&self, target: &str, injector: &str) {
        self.injections.pin().update_or_insert_with(
            target.to_string(),
            |injectors| {
                let mut injectors = injectors.clone();
                if !injectors.iter().any(|i| i == injector) {
                    injectors.push(injector.to_string());
                }
                injectors
            },
            || vec![injector.to_string()],
        );
    }

    /// Registers a grammar under its own scope name, replacing any previous one
    pub fn add_grammar(&self, raw: RawGrammar) {
        self.store_raw_grammar(Arc::new(raw));
        self.invalidate();
    }

    /// Registers a grammar, checking it declares the expected scope name
    pub fn add_grammar_for_scope(&self, scope_name: &str, raw: RawGrammar) -> OcraResult<()> {
        if raw.scope_name != scope_name {
            return Err(Error::ScopeNameMismatch {
                expected: scope_name.to_string(),
                found: raw.scope_name,
            });
        }
        self.add_grammar(raw);
        Ok(())
    }

    /// Reads the file and adds it as a grammar. Returns its scope name.
    pub fn add_grammar_from_path(&self, path: impl AsRef<Path>) -> OcraResult<String> {
        let raw = RawGrammar::load_from_file(path)?;
        let scope_name = raw.scope_name.clone();
        self.add_grammar(raw);
        Ok(scope_name)
    }

    /// The grammar for `scope_name` will be read from `path` the first time it's needed.
    ///
    /// Its `injectTo` is only known once it's loaded: use [`Registry::add_injection`]
    /// for grammars that need to be injected before that.
    pub fn register_grammar_path(&self, scope_name: &str, path: impl Into<PathBuf>) {
        self.grammar_paths.pin().insert(scope_name.to_string(), path.into());
    }

    /// Injects the grammar `injector` in `target`, where its `injectionSelector` matches
    pub fn add_injection(&self, target: &str, injector: &str) {
        self.push_injection(target, injector);
        self.invalidate();
    }

    /// Configuration used when `scope_name` is loaded with [`Registry::load_grammar`]
    pub fn set_grammar_configuration(&self, scope_name: &str, configuration: GrammarConfiguration) {
        self.configurations
            .pin()
            .insert(scope_name.to_string(), configuration);
        self.grammars.pin().remove(scope_name);
    }

    /// All the scope names that can be loaded
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.raw_grammars.pin().keys().cloned().collect();
        names.extend(self.grammar_paths.pin().keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    fn compiled_grammar(&self, scope_name: &str) -> OcraResult<Option<Arc<CompiledGrammar>>> {
        let slot = self
            .compiled
            .pin()
            .get_or_insert_with(scope_name.to_string(), || Arc::new(CompileSlot::default()))
            .clone();
        if let Some(compiled) = slot.compiled.get() {
            return Ok(Some(compiled.clone()));
        }

        let _guard = match slot.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Someone else compiled it while we were waiting
        if let Some(compiled) = slot.compiled.get() {
            return Ok(Some(compiled.clone()));
        }

        let Some(grammars) = load_dependencies(scope_name, self)? else {
            return Ok(None);
        };
        let injectors = self.injections(scope_name);
        let compiled = Arc::new(CompiledGrammar::compile(
            scope_name,
            &grammars,
            &injectors,
            self.backend.as_ref(),
        )?);
        let _ = slot.compiled.set(compiled.clone());
        Ok(Some(compiled))
    }

    /// Loads and compiles the grammar with everything it includes.
    ///
    /// Returns `Ok(None)` if nothing is registered for `scope_name`. The same
    /// [`Grammar`] is returned until a grammar or an injection is added.
    pub fn load_grammar(&self, scope_name: &str) -> OcraResult<Option<Arc<Grammar>>> {
        if let Some(grammar) = self.grammars.pin().get(scope_name) {
            return Ok(Some(grammar.clone()));
        }
        let Some(compiled) = self.compiled_grammar(scope_name)? else {
            return Ok(None);
        };
        let configuration = self.configurations.pin().get(scope_name).cloned();
        let grammar = Arc::new(Grammar::new(
            compiled,
            configuration.as_ref(),
            self.theme.clone(),
            self.backend.clone(),
        ));
        let grammars = self.grammars.pin();
        Ok(Some(grammars.get_or_insert(scope_name.to_string(), grammar).clone()))
    }

    /// Same as [`Registry::load_grammar`] with a specific configuration.
    ///
    /// The compiled rules are shared with the other grammars loaded for that scope but
    /// a new [`Grammar`] is returned every time.
    pub fn load_grammar_with_configuration(
        &self,
        scope_name: &str,
        configuration: &GrammarConfiguration,
    ) -> OcraResult<Option<Arc<Grammar>>> {
        let Some(compiled) = self.compiled_grammar(scope_name)? else {
            return Ok(None);
        };
        Ok(Some(Arc::new(Grammar::new(
            compiled,
            Some(configuration),
            self.theme.clone(),
            self.backend.clone(),
        ))))
    }

    /// Replaces the theme used by every grammar of this registry.
    ///
    /// States returned before keep the metadata of the previous theme.
    pub fn set_theme(&self, raw: &RawTheme) {
        self.theme.set(Theme::from_raw(raw));
    }

    pub fn set_theme_from_path(&self, path: impl AsRef<Path>) -> OcraResult<()> {
        self.theme.set(Theme::from_path(path)?);
        Ok(())
    }

    pub fn theme(&self) -> Arc<Theme> {
        self.theme.current()
    }

    /// Colours of the current theme indexed by the ids found in token metadata.
    /// Index 0 is unused.
    pub fn color_map(&self) -> Vec<String> {
        self.theme.current().color_map().colors().to_vec()
    }
}

impl GrammarLookup for Registry {
    fn lookup(&self, scope_name: &str) -> OcraResult<Option<Arc<RawGrammar>>> {
        if let Some(raw) = self.raw_grammars.pin().get(scope_name) {
            return Ok(Some(raw.clone()));
        }
        let Some(path) = self.grammar_paths.pin().get(scope_name).cloned() else {
            return Ok(None);
        };

        log::debug!("Loading grammar {scope_name} from {}", path.display());
        let raw = RawGrammar::load_from_file(&path)?;
        if raw.scope_name != scope_name {
            return Err(Error::ScopeNameMismatch {
                expected: scope_name.to_string(),
                found: raw.scope_name,
            });
        }
        let raw = Arc::new(raw);
        self.store_raw_grammar(raw.clone());
        Ok(Some(raw))
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injections
            .pin()
            .get(scope_name)
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("scope_names", &self.scope_names())
            .field("backend", &self.backend)
            .field("theme", &self.theme.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::CompiledPattern;
    use crate::test_utils::{STRING_GRAMMAR, render};
    use std::fs;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn raw(json: &str) -> RawGrammar {
        RawGrammar::from_json(json).unwrap()
    }

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ocra-registry-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn registry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
        assert_send_sync::<Grammar>();
    }

    #[derive(Debug, Default)]
    struct CountingBackend {
        compiles: AtomicUsize,
    }

    impl RegexBackend for CountingBackend {
        fn compile(&self, pattern: &str) -> Result<Arc<dyn CompiledPattern>, String> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            OnigBackend.compile(pattern)
        }
    }

    #[test]
    fn concurrent_first_loads_compile_once() {
        let single = Arc::new(CountingBackend::default());
        let registry = Registry::with_backend(single.clone());
        registry.add_grammar(raw(STRING_GRAMMAR));
        registry.load_grammar("source.x").unwrap().unwrap();
        let compiles_for_one_load = single.compiles.load(Ordering::SeqCst);
        assert!(compiles_for_one_load > 0);

        let backend = Arc::new(CountingBackend::default());
        let registry = Registry::with_backend(backend.clone());
        registry.add_grammar(raw(STRING_GRAMMAR));
        let threads = 8;
        let barrier = Barrier::new(threads);
        let grammars: Vec<Arc<Grammar>> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.load_grammar("source.x").unwrap().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(backend.compiles.load(Ordering::SeqCst), compiles_for_one_load);
        for grammar in &grammars {
            assert!(std::ptr::eq(grammar.compiled(), grammars[0].compiled()));
        }
    }

    #[test]
    fn a_state_can_be_shared_between_threads() {
        let registry = Registry::new();
        registry.add_grammar(raw(STRING_GRAMMAR));
        let grammar = registry.load_grammar("source.x").unwrap().unwrap();
        let state = grammar.tokenize_line("\"abc", None, None).next_state;
        let expected = grammar.tokenize_line("def\" x", Some(&state), None);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| grammar.tokenize_line("def\" x", Some(&state), None)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result.tokens, expected.tokens);
            assert_eq!(result.next_state, expected.next_state);
            assert_eq!(result.next_state.depth(), 1);
        }
        // The shared state is untouched
        assert_eq!(state.depth(), 2);
    }

    #[test]
    fn unknown_grammars_are_none() {
        let registry = Registry::new();
        assert!(registry.load_grammar("source.nope").unwrap().is_none());
    }

    #[test]
    fn rejects_scope_name_mismatch() {
        let registry = Registry::new();
        let err = registry
            .add_grammar_for_scope("source.y", raw(STRING_GRAMMAR))
            .unwrap_err();
        assert!(matches!(err, Error::ScopeNameMismatch { .. }));
        assert!(registry.scope_names().is_empty());
    }

    #[test]
    fn invalid_regexes_reject_the_grammar() {
        let registry = Registry::new();
        registry.add_grammar(raw(
            r##"{"scopeName": "source.bad", "patterns": [{"match": "(unclosed"}]}"##,
        ));
        let err = registry.load_grammar("source.bad").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn grammars_are_cached_until_something_changes() {
        let registry = Registry::new();
        registry.add_grammar(raw(STRING_GRAMMAR));
        let first = registry.load_grammar("source.x").unwrap().unwrap();
        let second = registry.load_grammar("source.x").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.add_grammar(raw(r##"{"scopeName": "source.other", "patterns": []}"##));
        let third = registry.load_grammar("source.x").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn loads_grammars_lazily_from_paths() {
        let path = temp_file("lazy.json", STRING_GRAMMAR);
        let registry = Registry::new();
        registry.register_grammar_path("source.x", &path);
        assert_eq!(registry.scope_names(), vec!["source.x"]);
        let grammar = registry.load_grammar("source.x").unwrap().unwrap();
        assert_eq!(grammar.scope_name(), "source.x");

        let registry = Registry::new();
        registry.register_grammar_path("source.wrong", &path);
        let err = registry.load_grammar("source.wrong").unwrap_err();
        assert!(matches!(err, Error::ScopeNameMismatch { .. }));
    }

    #[test]
    fn includes_other_grammars_and_their_injections() {
        let registry = Registry::new();
        registry.add_grammar(raw(
            r##"{
                "scopeName": "source.host",
                "patterns": [
                    {"begin": "```", "end": "```", "name": "meta.embedded", "patterns": [{"include": "source.x"}]}
                ]
            }"##,
        ));
        registry.add_grammar(raw(STRING_GRAMMAR));
        registry.add_grammar(raw(
            r##"{
                "scopeName": "text.todo",
                "injectTo": ["source.host"],
                "injectionSelector": "L:string.quoted",
                "patterns": [{"match": "TODO", "name": "keyword.todo"}]
            }"##,
        ));

        let grammar = registry.load_grammar("source.host").unwrap().unwrap();
        let line = "```\"TODO\"```";
        let result = grammar.tokenize_line(line, None, None);
        insta::assert_snapshot!(render(line, &result.tokens), @r#"
        0..3 '```' source.host meta.embedded
        3..4 '"' source.host meta.embedded string.quoted punctuation.definition.string
        4..8 'TODO' source.host meta.embedded string.quoted keyword.todo
        8..9 '"' source.host meta.embedded string.quoted punctuation.definition.string
        9..12 '```' source.host meta.embedded
        "#);
    }

    #[test]
    fn theme_changes_apply_to_loaded_grammars() {
        let registry = Registry::new();
        registry.add_grammar(raw(
            r##"{"scopeName": "source.x", "patterns": [{"match": "if", "name": "keyword.control"}]}"##,
        ));
        let grammar = registry.load_grammar("source.x").unwrap().unwrap();
        let before = grammar.tokenize_line_binary("if x", None, None);
        assert_eq!(before.tokens.len(), 1);

        registry.set_theme(
            &RawTheme::from_json(
                r##"{
                "settings": [
                    {"settings": {"foreground": "#111111", "background": "#222222"}},
                    {"scope": "keyword", "settings": {"foreground": "#ff0000", "fontStyle": "bold"}}
                ]
            }"##,
            )
            .unwrap(),
        );
        assert_eq!(registry.color_map(), vec!["", "#111111", "#222222", "#FF0000"]);

        let after = grammar.tokenize_line_binary("if x", None, None);
        assert_eq!(after.tokens.len(), 2);
        assert_eq!(after.tokens[0].metadata.foreground(), 3);
        assert_eq!(after.tokens[0].metadata.background(), 2);
        assert_eq!(after.tokens[1].start, 2);
        assert_eq!(after.tokens[1].metadata.foreground(), 1);
    }

    #[test]
    fn builds_from_config() {
        let grammar_path = temp_file("config-grammar.json", STRING_GRAMMAR);
        let theme_path = temp_file(
            "config-theme.json",
            r##"{"name": "tiny", "tokenColors": [{"scope": "string", "settings": {"foreground": "#00ff00"}}]}"##,
        );
        let config = RegistryConfig::from_json(&format!(
            r#"{{
                "grammars": {{"source.x": {:?}}},
                "configurations": {{"source.x": {{"initialLanguage": 7}}}},
                "theme": {:?}
            }}"#,
            grammar_path, theme_path
        ))
        .unwrap();

        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(registry.theme().name(), Some("tiny"));
        let grammar = registry.load_grammar("source.x").unwrap().unwrap();
        let result = grammar.tokenize_line_binary("a", None, None);
        assert_eq!(result.tokens[0].metadata.language_id(), 7);
    }
}
