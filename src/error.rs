use std::fmt;
use std::io;

use crate::grammars::CompileError;

pub type OcraResult<T> = Result<T, Error>;

/// Errors that can occur when loading grammars, themes or configuration files
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar, theme or configuration file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar, a theme or a configuration file.
    Json(serde_json::Error),

    /// An invalid hex color was encountered.
    #[allow(missing_docs)]
    InvalidHexColor { value: String, reason: String },

    /// A grammar was registered under a scope name different from the one it declares.
    #[allow(missing_docs)]
    ScopeNameMismatch { expected: String, found: String },

    /// A grammar was asked for by scope name but nothing is registered for it.
    GrammarNotFound(String),

    /// A grammar could not be compiled, eg it contains an invalid regex.
    /// The grammar is rejected as a whole.
    Compile(CompileError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::InvalidHexColor { value, reason } => {
                write!(f, "invalid hex color '{}': {}", value, reason)
            }
            Error::ScopeNameMismatch { expected, found } => write!(
                f,
                "grammar declares scope '{}' but was registered as '{}'",
                found, expected
            ),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::Compile(err) => write!(f, "grammar compilation error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Compile(err) => Some(err),
            Error::InvalidHexColor { .. }
            | Error::ScopeNameMismatch { .. }
            | Error::GrammarNotFound(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Error::Compile(err)
    }
}
