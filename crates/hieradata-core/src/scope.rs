//! Scope bindings
//!
//! The variables (including facts) visible to hierarchy path templates and
//! to `scope` interpolation. A scope is read-only for the duration of a
//! lookup.

use std::path::Path;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Read-only variable bindings for one lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    variables: IndexMap<String, Value>,
}

impl Scope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable, replacing any previous binding
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Bind a variable, replacing any previous binding
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let name = name.strip_prefix("::").map(str::to_string).unwrap_or(name);
        self.variables.insert(name, value.into());
    }

    /// Bind facts both as top-level variables and under the `facts` variable
    pub fn with_facts(mut self, facts: IndexMap<String, Value>) -> Self {
        for (name, value) in &facts {
            self.variables.insert(name.clone(), value.clone());
        }
        self.variables.insert("facts".into(), Value::Mapping(facts));
        self
    }

    /// Load facts from a YAML or JSON mapping file (by extension, YAML default)
    pub fn from_facts_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e.to_string()))?;

        let value = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<serde_json::Value>(&content)
                .map(Value::from)
                .map_err(|e| Error::parse(path, e.to_string()))?,
            _ => serde_yaml::from_str::<serde_yaml::Value>(&content)
                .map(Value::from)
                .map_err(|e| Error::parse(path, e.to_string()))?,
        };

        match value {
            Value::Mapping(facts) => Ok(Self::new().with_facts(facts)),
            Value::Null => Ok(Self::new()),
            other => Err(Error::parse(
                path,
                format!("facts must be a mapping, got {}", other.type_name()),
            )),
        }
    }

    /// Look up a variable.
    ///
    /// A leading `::` is ignored; a dotted name digs into structured
    /// variables (`facts.os.family`).
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.strip_prefix("::").unwrap_or(name);
        let mut parts = name.split('.');
        let variable = self.variables.get(parts.next()?)?;
        let rest: Vec<&str> = parts.collect();
        variable.dig(&rest)
    }

    /// True when no variables are bound
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
