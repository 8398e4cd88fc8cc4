mod config;
mod error;
mod grammar;
mod grammars;
mod metadata;
mod registry;
mod scope;
mod source;
mod themes;
mod tokenizer;

pub use config::{GrammarConfiguration, RegistryConfig};
pub use error::{Error, OcraResult};
pub use grammar::{Grammar, TokenizeLineBinaryResult, TokenizeLineResult};
pub use grammars::{
    CaptureSpans, CompileError, CompiledPattern, OnigBackend, RawGrammar, RawRule, RegexBackend,
    escape_regex, replace_captures, resolve_backreferences,
};
pub use metadata::{StandardTokenType, TokenMetadata};
pub use registry::Registry;
pub use scope::Scope;
pub use source::SourceLine;
pub use themes::{Color, ColorMap, FontStyle, RawTheme, StyleAttributes, Theme};
pub use tokenizer::{BinaryToken, ScopeListElement, StackElement, Token};
