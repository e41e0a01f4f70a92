//! Lookup keys
//!
//! A key such as `ntp::servers.0` has three parts:
//! - the root key `ntp::servers`, which is what data files are indexed by
//! - the module namespace `ntp`, present only for qualified keys
//! - dig segments (`0`), navigated into the value once it has been found
//!
//! A leading `::` marks a top-scope key and is dropped.

use std::fmt;

use crate::error::{Error, Result};

/// A parsed lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    name: String,
    root: String,
    segments: Vec<String>,
}

impl LookupKey {
    /// Parse a key, validating that no segment is empty
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.strip_prefix("::").unwrap_or(name);
        if trimmed.is_empty() {
            return Err(Error::invalid_key(name, "lookup key must not be empty"));
        }

        let mut parts = trimmed.split('.');
        let root = parts.next().unwrap_or_default().to_string();
        let segments: Vec<String> = parts.map(str::to_string).collect();

        if root.is_empty() || segments.iter().any(String::is_empty) {
            return Err(Error::invalid_key(name, "lookup key has an empty '.' segment"));
        }
        if root.split("::").any(str::is_empty) {
            return Err(Error::invalid_key(name, "lookup key has an empty '::' segment"));
        }

        Ok(Self {
            name: trimmed.to_string(),
            root,
            segments,
        })
    }

    /// The full key, without any leading `::`
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The part of the key data files are indexed by
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Segments to dig into the found value
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Module namespace for qualified keys (`ntp` for `ntp::servers`)
    pub fn module(&self) -> Option<&str> {
        self.root.split_once("::").map(|(module, _)| module)
    }

    /// True when the key is namespaced to a module
    pub fn is_qualified(&self) -> bool {
        self.module().is_some()
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
