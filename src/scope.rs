//! Scope names like `source.rust meta.function`.
//!
//! A scope is a dot-separated name. Names coming from grammars can contain several
//! scopes separated by spaces, see [`Scope::split_path`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single scope name, cheap to clone and shared between tokens of a line
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    pub fn new(s: &str) -> Scope {
        Scope(Arc::from(s.trim()))
    }

    /// Splits a space separated list of scopes, eg a rule name of `meta.tag string.quoted`.
    /// Empty parts are dropped.
    pub fn split_path(s: &str) -> Vec<Scope> {
        s.split(' ')
            .filter(|part| !part.is_empty())
            .map(Scope::new)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of dot separated atoms
    pub fn len(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.split('.').count()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `string` is a prefix of `string` and `string.quoted` but not of `strings`.
    pub fn is_prefix_of(&self, other: &str) -> bool {
        is_scope_prefix(&self.0, other)
    }
}

/// Same as [`Scope::is_prefix_of`] without needing to allocate a scope
pub(crate) fn is_scope_prefix(prefix: &str, scope: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    scope == prefix
        || (scope.len() > prefix.len()
            && scope.starts_with(prefix)
            && scope.as_bytes()[prefix.len()] == b'.')
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope::new(value)
    }
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Scope {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Scope {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Scope::new(&s))
    }
}
