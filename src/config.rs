use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::OcraResult;
use crate::metadata::StandardTokenType;

/// Per grammar options that end up in the metadata of binary tokens.
///
/// ```json
/// {
///   "initialLanguage": 1,
///   "embeddedLanguages": {"source.css": 2},
///   "tokenTypes": {"meta.template.expression": "other"},
///   "balancedBracketSelectors": ["*"],
///   "unbalancedBracketSelectors": ["comment", "string"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrammarConfiguration {
    /// Language id of the grammar itself
    pub initial_language: u32,
    /// Scope prefix to language id, eg `source.css` inside HTML
    pub embedded_languages: BTreeMap<String, u32>,
    /// Scope selector to the token type forced on matching tokens
    pub token_types: BTreeMap<String, StandardTokenType>,
    /// Selectors of the tokens whose brackets are balanced, `*` for all of them
    pub balanced_bracket_selectors: Vec<String>,
    /// Selectors of the tokens whose brackets are never balanced, eg strings
    pub unbalanced_bracket_selectors: Vec<String>,
}

/// What a [`crate::Registry`] should be built with.
///
/// Relative paths are resolved from the directory of the configuration file when it's
/// loaded with [`RegistryConfig::load_from_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Scope name to the path of the grammar, loaded on first use
    pub grammars: BTreeMap<String, PathBuf>,
    /// Target scope name to the scope names of the grammars injected into it
    pub injections: BTreeMap<String, Vec<String>>,
    /// Configuration used when loading a grammar by scope name
    pub configurations: BTreeMap<String, GrammarConfiguration>,
    /// VS Code theme to use instead of the default one
    pub theme: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn from_json(json: &str) -> OcraResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut config: RegistryConfig = serde_json::from_reader(BufReader::new(file))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, dir: &Path) {
        for path in self.grammars.values_mut() {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
        if let Some(theme) = &mut self.theme
            && theme.is_relative()
        {
            *theme = dir.join(&*theme);
        }
    }
}
