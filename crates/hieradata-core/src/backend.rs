//! Data backends
//!
//! A backend decodes the text of a data file into a table of root keys to
//! values. YAML and JSON are built in; the registry is keyed by provider
//! kind so callers can substitute their own decoder.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::hierarchy::ProviderKind;
use crate::provider::ValueTable;
use crate::value::Value;

/// Why a backend could not decode a file
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("data file must contain a mapping at the top level, got {got}")]
    NotAMapping { got: &'static str },
}

/// Decodes data file text into a value table
pub trait Backend: Send + Sync {
    /// Provider kind this backend serves
    fn kind(&self) -> ProviderKind;

    /// Decode the contents of one data file
    fn parse(
        &self,
        text: &str,
        options: &IndexMap<String, Value>,
    ) -> std::result::Result<ValueTable, BackendError>;
}

/// YAML data files (`yaml_data`)
pub struct YamlBackend;

impl Backend for YamlBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Yaml
    }

    fn parse(
        &self,
        text: &str,
        _options: &IndexMap<String, Value>,
    ) -> std::result::Result<ValueTable, BackendError> {
        if text.trim().is_empty() {
            return Ok(ValueTable::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        into_table(Value::from(value))
    }
}

/// JSON data files (`json_data`)
pub struct JsonBackend;

impl Backend for JsonBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Json
    }

    fn parse(
        &self,
        text: &str,
        _options: &IndexMap<String, Value>,
    ) -> std::result::Result<ValueTable, BackendError> {
        if text.trim().is_empty() {
            return Ok(ValueTable::default());
        }
        let value: serde_json::Value = serde_json::from_str(text)?;
        into_table(Value::from(value))
    }
}

fn into_table(value: Value) -> std::result::Result<ValueTable, BackendError> {
    match value {
        Value::Mapping(map) => Ok(ValueTable::new(map)),
        Value::Null => Ok(ValueTable::default()),
        other => Err(BackendError::NotAMapping {
            got: other.type_name(),
        }),
    }
}

/// Backends by provider kind
#[derive(Clone)]
pub struct BackendRegistry {
    backends: HashMap<ProviderKind, Arc<dyn Backend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Create a registry with the YAML and JSON backends
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(YamlBackend));
        registry.register(Arc::new(JsonBackend));
        registry
    }

    /// Register a backend, replacing any backend of the same kind
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn Backend>> {
        self.backends.get(&kind)
    }
}
