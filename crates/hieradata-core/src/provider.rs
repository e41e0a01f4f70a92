//! Data providers and the parsed-file cache
//!
//! Each data file is read and decoded at most once per location, no matter
//! how many lookups race for it. Concurrent callers for the same location
//! wait on a per-location gate while one of them parses; callers for other
//! locations are not blocked. Parse failures are not cached, so a fixed
//! file is picked up by the next lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use indexmap::IndexMap;
use serde::Serialize;

use crate::backend::BackendRegistry;
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::value::Value;

/// The decoded contents of one data file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTable {
    entries: IndexMap<String, Value>,
}

impl ValueTable {
    pub fn new(entries: IndexMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn get(&self, root_key: &str) -> Option<&Value> {
        self.entries.get(root_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Default)]
struct Gate {
    table: OnceLock<Arc<ValueTable>>,
    loading: Mutex<()>,
}

/// Shared cache of decoded data files
#[derive(Default)]
pub struct DataCache {
    gates: RwLock<HashMap<PathBuf, Arc<Gate>>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded table for a source, or `None` if the file does not exist
    pub fn load(
        &self,
        source: &DataSource,
        backends: &BackendRegistry,
    ) -> Result<Option<Arc<ValueTable>>> {
        let gate = self.gate(&source.location);

        if let Some(table) = gate.table.get() {
            log::trace!("Cache hit for {}", source.location.display());
            return Ok(Some(Arc::clone(table)));
        }

        let _loading = gate.loading.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished while we waited
        if let Some(table) = gate.table.get() {
            return Ok(Some(Arc::clone(table)));
        }

        let text = match std::fs::read_to_string(&source.location) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::trace!("Data file {} does not exist", source.location.display());
                return Ok(None);
            }
            Err(e) => return Err(Error::io(&source.location, e.to_string())),
        };

        let backend = backends.get(source.provider).ok_or_else(|| {
            Error::config(format!("No backend registered for '{}'", source.provider))
                .with_location(&source.location)
        })?;

        let table = backend.parse(&text, &source.options).map_err(|e| {
            log::warn!("Unable to parse {}: {}", source.location.display(), e);
            Error::parse(&source.location, e.to_string())
        })?;

        log::debug!(
            "Parsed {} ({} key(s))",
            source.location.display(),
            table.len()
        );

        let table = Arc::new(table);
        let _ = gate.table.set(Arc::clone(&table));
        Ok(Some(table))
    }

    /// Forget every cached file under a directory
    pub fn invalidate_under(&self, root: &Path) {
        let mut gates = self.gates.write().unwrap_or_else(PoisonError::into_inner);
        gates.retain(|location, _| !location.starts_with(root));
    }

    /// Forget every cached file
    pub fn clear(&self) {
        self.gates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of files currently cached
    pub fn len(&self) -> usize {
        self.gates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|gate| gate.table.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn gate(&self, location: &Path) -> Arc<Gate> {
        {
            let gates = self.gates.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(gate) = gates.get(location) {
                return Arc::clone(gate);
            }
        }

        let mut gates = self.gates.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(location.to_path_buf()).or_default())
    }
}

/// What one data source had to say about a key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum SourceOutcome {
    Found(Value),
    NotFound,
    /// The file does not exist
    Missing,
}

/// Reads root keys out of data sources through the cache
pub struct DataProvider<'a> {
    cache: &'a DataCache,
    backends: &'a BackendRegistry,
}

impl<'a> DataProvider<'a> {
    pub fn new(cache: &'a DataCache, backends: &'a BackendRegistry) -> Self {
        Self { cache, backends }
    }

    pub fn lookup(&self, source: &DataSource, root_key: &str) -> Result<SourceOutcome> {
        Ok(match self.cache.load(source, self.backends)? {
            None => SourceOutcome::Missing,
            Some(table) => match table.get(root_key) {
                Some(value) => SourceOutcome::Found(value.clone()),
                None => SourceOutcome::NotFound,
            },
        })
    }

    /// The value of a key in one source, if present
    pub fn get(&self, source: &DataSource, root_key: &str) -> Result<Option<Value>> {
        Ok(match self.lookup(source, root_key)? {
            SourceOutcome::Found(value) => Some(value),
            SourceOutcome::NotFound | SourceOutcome::Missing => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendError, YamlBackend};
    use crate::error::ErrorKind;
    use crate::hierarchy::ProviderKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        parses: AtomicUsize,
    }

    impl Backend for CountingBackend {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Yaml
        }

        fn parse(
            &self,
            text: &str,
            options: &IndexMap<String, Value>,
        ) -> std::result::Result<ValueTable, BackendError> {
            self.parses.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            YamlBackend.parse(text, options)
        }
    }

    fn source(location: PathBuf) -> DataSource {
        DataSource {
            level_name: "Common".into(),
            location,
            provider: ProviderKind::Yaml,
            options: IndexMap::new(),
        }
    }

    #[test]
    fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new();
        let backends = BackendRegistry::with_builtins();
        let provider = DataProvider::new(&cache, &backends);

        let outcome = provider
            .lookup(&source(dir.path().join("nope.yaml")), "a")
            .unwrap();

        assert_eq!(outcome, SourceOutcome::Missing);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_found_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.yaml");
        std::fs::write(&path, "a: 1\n").unwrap();
        let cache = DataCache::new();
        let backends = BackendRegistry::with_builtins();
        let provider = DataProvider::new(&cache, &backends);

        assert_eq!(
            provider.get(&source(path.clone()), "a").unwrap(),
            Some(Value::Integer(1))
        );
        assert_eq!(
            provider.lookup(&source(path), "b").unwrap(),
            SourceOutcome::NotFound
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_failure_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.yaml");
        std::fs::write(&path, "a: [broken\n").unwrap();
        let cache = DataCache::new();
        let backends = BackendRegistry::with_builtins();
        let provider = DataProvider::new(&cache, &backends);

        let err = provider.get(&source(path.clone()), "a").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Parse { .. }));
        assert!(err
            .to_string()
            .starts_with(&format!("Unable to parse ({})", path.display())));

        std::fs::write(&path, "a: fixed\n").unwrap();
        assert_eq!(
            provider.get(&source(path), "a").unwrap(),
            Some(Value::from("fixed"))
        );
    }

    #[test]
    fn test_parsed_once_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.yaml");
        std::fs::write(&path, "a: 1\n").unwrap();
        let cache = DataCache::new();
        let counting = Arc::new(CountingBackend {
            parses: AtomicUsize::new(0),
        });
        let mut backends = BackendRegistry::new();
        backends.register(counting.clone());

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let provider = DataProvider::new(&cache, &backends);
                    assert_eq!(
                        provider.get(&source(path.clone()), "a").unwrap(),
                        Some(Value::Integer(1))
                    );
                });
            }
        });

        assert_eq!(counting.parses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_under_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("common.yaml");
        std::fs::write(&path, "a: old\n").unwrap();
        let cache = DataCache::new();
        let backends = BackendRegistry::with_builtins();
        let provider = DataProvider::new(&cache, &backends);

        assert_eq!(provider.get(&source(path.clone()), "a").unwrap(), Some(Value::from("old")));
        std::fs::write(&path, "a: new\n").unwrap();
        assert_eq!(provider.get(&source(path.clone()), "a").unwrap(), Some(Value::from("old")));

        cache.invalidate_under(Path::new("/somewhere/else"));
        assert_eq!(cache.len(), 1);

        cache.invalidate_under(dir.path());
        assert_eq!(provider.get(&source(path), "a").unwrap(), Some(Value::from("new")));

        cache.clear();
        assert!(cache.is_empty());
    }
}
