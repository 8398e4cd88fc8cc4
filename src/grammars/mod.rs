mod backend;
mod backrefs;
mod compiled;
pub(crate) mod dependencies;
mod injections;
mod pattern_set;
mod raw;
mod regex;

pub use backend::{CaptureSpans, CompiledPattern, OnigBackend, RegexBackend};
pub use backrefs::{escape_regex, replace_captures, resolve_backreferences};
pub use compiled::*;
pub use injections::{CompiledSelector, InjectionPriority, SelectorMatcher, parse_selector};
pub use pattern_set::{PatternSet, PatternSetMatch};
pub use raw::{RawCaptures, RawGrammar, RawRule};
pub use regex::Regex;
