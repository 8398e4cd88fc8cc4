use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::OcraResult;

/// Capture groups, keyed by group number as a string (`"0"`, `"1"`...).
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "storage.type.function.js" },
///   "2": {
///     "name": "meta.parameters.js",
///     "patterns": [{ "include": "#parameters" }]
///   }
/// }
/// ```
pub type RawCaptures = BTreeMap<String, RawRule>;

/// `applyEndPatternLast` is found both as a boolean and as 0/1 in the wild
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<BoolOrInt>::deserialize(deserializer)? {
        Some(BoolOrInt::Bool(b)) => b,
        Some(BoolOrInt::Int(i)) => i != 0,
        None => false,
    })
}

/// Repository entries can be a rule or directly an array of patterns
fn deserialize_repository<'de, D>(
    deserializer: D,
) -> Result<Option<HashMap<String, RawRule>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RepositoryEntry {
        Patterns(Vec<RawRule>),
        Rule(Box<RawRule>),
    }

    let Some(entries) = Option::<HashMap<String, RepositoryEntry>>::deserialize(deserializer)?
    else {
        return Ok(None);
    };
    let repository = entries
        .into_iter()
        .map(|(key, entry)| {
            let rule = match entry {
                RepositoryEntry::Patterns(patterns) => RawRule {
                    patterns: Some(patterns),
                    ..Default::default()
                },
                RepositoryEntry::Rule(rule) => *rule,
            };
            (key, rule)
        })
        .collect();
    Ok(Some(repository))
}

/// A single rule of a grammar.
///
/// Which fields are present decides the kind of rule:
/// - `match`: a single line match
/// - `begin` + `end`: a region that can span lines
/// - `begin` + `while`: a region that continues as long as each line matches `while`
/// - `include`: a reference to another rule
/// - only `patterns`: a container of rules
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": {
///     "0": { "name": "punctuation.definition.string.begin.js" }
///   },
///   "patterns": [
///     { "match": "\\\\.", "name": "constant.character.escape.js" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawRule {
    /// Reference to other patterns
    /// - "#name" - repository entry, looked up in enclosing repositories first
    /// - "source.lang" - another grammar's root patterns
    /// - "source.lang#name" - repository entry in another grammar
    /// - "$self" - current grammar's root patterns
    /// - "$base" - root patterns of the grammar being tokenized
    #[serde(default)]
    pub include: Option<String>,
    /// Scope for the whole match or region, can refer to captures with `$1` or
    /// `${1:/downcase}`
    #[serde(default)]
    pub name: Option<String>,
    /// Scope for the content between begin and end
    #[serde(default)]
    pub content_name: Option<String>,
    #[serde(default, rename(deserialize = "match"))]
    pub match_: Option<String>,
    /// Captures for `match`, and fallback for begin/end/while captures
    #[serde(default)]
    pub captures: Option<RawCaptures>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub begin_captures: Option<RawCaptures>,
    /// Can reference captures from begin pattern using \\1, \\2, etc.
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub end_captures: Option<RawCaptures>,
    #[serde(default, rename(deserialize = "while"))]
    pub while_: Option<String>,
    #[serde(default)]
    pub while_captures: Option<RawCaptures>,
    #[serde(default)]
    pub patterns: Option<Vec<RawRule>>,
    /// Rules visible to includes inside this rule only
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: Option<HashMap<String, RawRule>>,
    /// Whether nested patterns win over the end pattern when they match at the same position
    #[serde(default, deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure representing a complete TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "mjs"],
///   "patterns": [{ "include": "#statements" }],
///   "repository": {
///     "statements": { "patterns": [{ "include": "#keywords" }] }
///   },
///   "injections": {
///     "L:comment.block": { "patterns": [{ "include": "#todo" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Unique identifier for this grammar's scope
    /// Example: "source.js", "text.html.markdown"
    pub scope_name: String,
    /// Human-readable name of the language
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: Option<HashMap<String, RawRule>>,
    /// Selectors mapped to rules that get injected in this grammar
    #[serde(default)]
    pub injections: Option<BTreeMap<String, RawRule>>,
    /// Selector deciding where this grammar gets injected when it's used as an injection
    /// through [`RawGrammar::inject_to`] or `Registry::add_injection`
    #[serde(default)]
    pub injection_selector: Option<String>,
    /// Scope names of the grammars this grammar should be injected into
    #[serde(default)]
    pub inject_to: Vec<String>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let file = File::open(&path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    pub fn from_json(json: &str) -> OcraResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn repository_rule(&self, name: &str) -> Option<&RawRule> {
        self.repository.as_ref()?.get(name)
    }
}
