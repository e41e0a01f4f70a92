//! Hierarchy declarations
//!
//! Each layer (the global config dir, an environment, a module) may declare
//! its hierarchy in a `hiera.yaml` at its root:
//!
//! ```yaml
//! version: 5
//! defaults:
//!   datadir: data
//!   data_hash: yaml_data
//! hierarchy:
//!   - name: "Per node"
//!     path: "nodes/%{trusted.certname}.yaml"
//!   - name: "Shared"
//!     paths: ["os/%{facts.os.family}.json", "common.json"]
//!     data_hash: json_data
//! lookup_options:
//!   ntp::servers:
//!     merge: unique
//! ```
//!
//! A layer without a declaration gets the built-in default: a single
//! `Common` level reading `data/common.yaml`.

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::interpolation::{self, InterpolationMethod, Segment};
use crate::merge::{MergeOptions, MergeStrategy};
use crate::value::Value;

/// File name of a layer's hierarchy declaration
pub const HIERARCHY_FILE: &str = "hiera.yaml";
/// Data directory used when a declaration does not name one
pub const DEFAULT_DATADIR: &str = "data";
/// Name of the single level in the built-in default hierarchy
pub const DEFAULT_LEVEL_NAME: &str = "Common";
/// Path of the single level in the built-in default hierarchy
pub const DEFAULT_LEVEL_PATH: &str = "common.yaml";

/// Backend format of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Yaml,
    Json,
}

impl ProviderKind {
    /// Resolve a provider kind from its declared name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "yaml" | "yaml_data" => Some(ProviderKind::Yaml),
            "json" | "json_data" => Some(ProviderKind::Json),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Yaml => "yaml_data",
            ProviderKind::Json => "json_data",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which layer a hierarchy belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Global,
    Environment(String),
    Module(String),
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Global => write!(f, "global"),
            LayerKind::Environment(name) => write!(f, "environment '{}'", name),
            LayerKind::Module(name) => write!(f, "module '{}'", name),
        }
    }
}

/// Identifies the hierarchy declaration to load
#[derive(Debug, Clone)]
pub struct ScopeDescriptor {
    pub layer: LayerKind,
    /// Layer root; `hiera.yaml` and relative datadirs resolve against it
    pub root: PathBuf,
}

impl ScopeDescriptor {
    pub fn new(layer: LayerKind, root: impl Into<PathBuf>) -> Self {
        Self {
            layer,
            root: root.into(),
        }
    }
}

/// Whether a template names one file or a glob pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Path,
    Glob,
}

/// A path template with its `%{...}` placeholders already tokenized
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    pub kind: TemplateKind,
    pub source: String,
    pub segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template, allowing only scope and literal interpolation
    pub fn parse(kind: TemplateKind, source: &str) -> Result<Self> {
        let segments = interpolation::tokenize(source)?;

        for segment in &segments {
            if let Segment::Token(token) = segment {
                if !matches!(
                    token.method,
                    InterpolationMethod::Scope | InterpolationMethod::Literal
                ) {
                    return Err(Error::config(format!(
                        "Interpolation method '{}' is not allowed in hierarchy path '{}'",
                        token.method, source
                    ))
                    .with_help("Hierarchy paths may only interpolate scope variables"));
                }
            }
        }

        Ok(Self {
            kind,
            source: source.to_string(),
            segments,
        })
    }
}

/// One level of a hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyLevel {
    pub name: String,
    /// Absolute data directory the templates resolve against
    pub datadir: PathBuf,
    pub templates: Vec<PathTemplate>,
    pub provider: ProviderKind,
    pub options: IndexMap<String, Value>,
}

/// A loaded hierarchy declaration
#[derive(Debug, Clone)]
pub struct Hierarchy {
    pub layer: LayerKind,
    pub root: PathBuf,
    /// Levels in declaration (precedence) order
    pub levels: Vec<HierarchyLevel>,
    /// Per-key merge policies declared under `lookup_options`
    pub lookup_options: IndexMap<String, MergeStrategy>,
    /// The declaration file, or `None` for the built-in default
    pub declared_in: Option<PathBuf>,
}

impl Hierarchy {
    /// Merge policy declared for a root key
    pub fn merge_for(&self, root_key: &str) -> Option<&MergeStrategy> {
        self.lookup_options.get(root_key)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHierarchy {
    version: Option<u32>,
    datadir: Option<String>,
    defaults: Option<RawDefaults>,
    hierarchy: Option<Vec<RawLevel>>,
    lookup_options: Option<IndexMap<String, RawLookupOptions>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    datadir: Option<String>,
    #[serde(alias = "backend")]
    data_hash: Option<String>,
    options: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLevel {
    name: Option<String>,
    path: Option<String>,
    paths: Option<Vec<String>>,
    glob: Option<String>,
    globs: Option<Vec<String>>,
    datadir: Option<String>,
    #[serde(alias = "backend")]
    data_hash: Option<String>,
    options: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLookupOptions {
    merge: serde_yaml::Value,
}

/// Loads hierarchy declarations
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the hierarchy for a layer, falling back to the built-in default
    /// when the layer has no `hiera.yaml`
    pub fn load(descriptor: &ScopeDescriptor) -> Result<Hierarchy> {
        let path = descriptor.root.join(HIERARCHY_FILE);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "No {} for {}; using the default hierarchy",
                    HIERARCHY_FILE,
                    descriptor.layer
                );
                return Ok(Self::default_hierarchy(descriptor));
            }
            Err(e) => return Err(Error::io(&path, e.to_string())),
        };

        let hierarchy = Self::parse(descriptor, &content, &path)?;
        log::debug!(
            "Loaded {} hierarchy with {} level(s) from {}",
            descriptor.layer,
            hierarchy.levels.len(),
            path.display()
        );
        Ok(hierarchy)
    }

    /// Parse a declaration read from `path`
    pub fn parse(descriptor: &ScopeDescriptor, content: &str, path: &Path) -> Result<Hierarchy> {
        let raw: RawHierarchy = if content.trim().is_empty() {
            RawHierarchy {
                version: None,
                datadir: None,
                defaults: None,
                hierarchy: None,
                lookup_options: None,
            }
        } else {
            serde_yaml::from_str(content).map_err(|e| Error::parse(path, e.to_string()))?
        };

        Self::validate(descriptor, raw)
            .map_err(|e| e.with_location(path))
            .map(|mut hierarchy| {
                hierarchy.declared_in = Some(path.to_path_buf());
                hierarchy
            })
    }

    /// The built-in single-level hierarchy
    pub fn default_hierarchy(descriptor: &ScopeDescriptor) -> Hierarchy {
        let level = HierarchyLevel {
            name: DEFAULT_LEVEL_NAME.to_string(),
            datadir: descriptor.root.join(DEFAULT_DATADIR),
            templates: vec![PathTemplate {
                kind: TemplateKind::Path,
                source: DEFAULT_LEVEL_PATH.to_string(),
                segments: vec![Segment::Text(DEFAULT_LEVEL_PATH.to_string())],
            }],
            provider: ProviderKind::Yaml,
            options: IndexMap::new(),
        };

        Hierarchy {
            layer: descriptor.layer.clone(),
            root: descriptor.root.clone(),
            levels: vec![level],
            lookup_options: IndexMap::new(),
            declared_in: None,
        }
    }

    fn validate(descriptor: &ScopeDescriptor, raw: RawHierarchy) -> Result<Hierarchy> {
        let version = raw.version.unwrap_or(5);
        if !matches!(version, 4 | 5) {
            return Err(Error::config(format!(
                "Unsupported hierarchy version {}",
                version
            ))
            .with_help("Declare 'version: 5'"));
        }

        let defaults = raw.defaults.unwrap_or_default();
        let default_datadir = defaults
            .datadir
            .or(raw.datadir)
            .unwrap_or_else(|| DEFAULT_DATADIR.to_string());
        let default_provider = match &defaults.data_hash {
            Some(name) => provider_kind(name)?,
            None => ProviderKind::Yaml,
        };
        let default_options = options_mapping(defaults.options)?;

        let mut levels: Vec<HierarchyLevel> = Vec::new();
        for (index, raw_level) in raw.hierarchy.into_iter().flatten().enumerate() {
            let name = match raw_level.name {
                Some(name) if !name.trim().is_empty() => name,
                _ => {
                    return Err(Error::config(format!(
                        "Hierarchy level #{} has no name",
                        index + 1
                    )))
                }
            };
            if levels.iter().any(|l| l.name == name) {
                return Err(Error::config(format!(
                    "Hierarchy level name '{}' is used more than once",
                    name
                )));
            }

            let templates = level_templates(
                &name,
                raw_level.path,
                raw_level.paths,
                raw_level.glob,
                raw_level.globs,
            )?;

            let provider = match &raw_level.data_hash {
                Some(kind) => provider_kind(kind)?,
                None => default_provider,
            };

            let datadir = descriptor
                .root
                .join(raw_level.datadir.as_deref().unwrap_or(&default_datadir));

            let mut options = default_options.clone();
            options.extend(options_mapping(raw_level.options)?);

            levels.push(HierarchyLevel {
                name,
                datadir,
                templates,
                provider,
                options,
            });
        }

        if levels.is_empty() {
            levels = Self::default_hierarchy(descriptor).levels;
        }

        let mut lookup_options = IndexMap::new();
        for (key, declared) in raw.lookup_options.unwrap_or_default() {
            let strategy = MergeOptions::from_value(&Value::from(declared.merge))
                .and_then(|options| options.strategy())
                .map_err(|e| e.with_key(key.clone()))?;
            lookup_options.insert(key, strategy);
        }

        Ok(Hierarchy {
            layer: descriptor.layer.clone(),
            root: descriptor.root.clone(),
            levels,
            lookup_options,
            declared_in: None,
        })
    }
}

fn provider_kind(name: &str) -> Result<ProviderKind> {
    ProviderKind::from_name(name).ok_or_else(|| {
        Error::config(format!("Unknown data provider '{}'", name))
            .with_help("Use yaml_data or json_data")
    })
}

fn options_mapping(options: Option<serde_yaml::Value>) -> Result<IndexMap<String, Value>> {
    match options.map(Value::from) {
        None | Some(Value::Null) => Ok(IndexMap::new()),
        Some(Value::Mapping(map)) => Ok(map),
        Some(other) => Err(Error::config(format!(
            "Provider options must be a mapping, got {}",
            other.type_name()
        ))),
    }
}

fn level_templates(
    name: &str,
    path: Option<String>,
    paths: Option<Vec<String>>,
    glob: Option<String>,
    globs: Option<Vec<String>>,
) -> Result<Vec<PathTemplate>> {
    let (kind, sources) = match (path, paths, glob, globs) {
        (Some(p), None, None, None) => (TemplateKind::Path, vec![p]),
        (None, Some(ps), None, None) => (TemplateKind::Path, ps),
        (None, None, Some(g), None) => (TemplateKind::Glob, vec![g]),
        (None, None, None, Some(gs)) => (TemplateKind::Glob, gs),
        _ => {
            return Err(Error::config(format!(
                "Hierarchy level '{}' must declare exactly one of path, paths, glob or globs",
                name
            )))
        }
    };

    if sources.is_empty() {
        return Err(Error::config(format!(
            "Hierarchy level '{}' declares no paths",
            name
        )));
    }

    sources
        .iter()
        .map(|source| PathTemplate::parse(kind, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn env_descriptor() -> ScopeDescriptor {
        ScopeDescriptor::new(LayerKind::Environment("production".into()), "/envs/production")
    }

    fn parse(yaml: &str) -> Result<Hierarchy> {
        ConfigLoader::parse(
            &env_descriptor(),
            yaml,
            Path::new("/envs/production/hiera.yaml"),
        )
    }

    #[test]
    fn test_missing_declaration_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = ScopeDescriptor::new(LayerKind::Module("one".into()), dir.path());

        let hierarchy = ConfigLoader::load(&descriptor).unwrap();

        assert_eq!(hierarchy.levels.len(), 1);
        assert_eq!(hierarchy.levels[0].name, "Common");
        assert_eq!(hierarchy.levels[0].datadir, dir.path().join("data"));
        assert_eq!(hierarchy.levels[0].templates[0].source, "common.yaml");
        assert_eq!(hierarchy.levels[0].provider, ProviderKind::Yaml);
        assert!(hierarchy.declared_in.is_none());
    }

    #[test]
    fn test_version_5_levels_in_order() {
        let hierarchy = parse(
            r#"
version: 5
defaults:
  datadir: hieradata
  data_hash: yaml_data
hierarchy:
  - name: "Per node"
    path: "nodes/%{trusted.certname}.yaml"
  - name: "Shared"
    paths: ["os/%{facts.os.family}.json", "common.json"]
    data_hash: json_data
    datadir: other
    options:
      strict: true
  - name: "Fragments"
    glob: "fragments/*.yaml"
"#,
        )
        .unwrap();

        let names: Vec<&str> = hierarchy.levels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Per node", "Shared", "Fragments"]);

        let node = &hierarchy.levels[0];
        assert_eq!(node.datadir, PathBuf::from("/envs/production/hieradata"));
        assert_eq!(node.provider, ProviderKind::Yaml);

        let shared = &hierarchy.levels[1];
        assert_eq!(shared.datadir, PathBuf::from("/envs/production/other"));
        assert_eq!(shared.provider, ProviderKind::Json);
        assert_eq!(shared.templates.len(), 2);
        assert_eq!(shared.options.get("strict"), Some(&Value::Bool(true)));

        assert_eq!(hierarchy.levels[2].templates[0].kind, TemplateKind::Glob);
        assert_eq!(
            hierarchy.declared_in,
            Some(PathBuf::from("/envs/production/hiera.yaml"))
        );
    }

    #[test]
    fn test_version_4_backend_key() {
        let hierarchy = parse(
            r#"
version: 4
datadir: data
hierarchy:
  - name: "json"
    backend: json
    path: "common"
"#,
        )
        .unwrap();

        assert_eq!(hierarchy.levels[0].provider, ProviderKind::Json);
        assert_eq!(
            hierarchy.levels[0].datadir,
            PathBuf::from("/envs/production/data")
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse(
            r#"
version: 5
hierarchy:
  - name: "eyaml"
    data_hash: eyaml_data
    path: "secrets.eyaml"
"#,
        )
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.to_string().contains("Unknown data provider 'eyaml_data'"));
        assert!(err.to_string().contains("File: /envs/production/hiera.yaml"));
    }

    #[test]
    fn test_unsupported_version() {
        let err = parse("version: 3\n").unwrap_err();
        assert!(err.to_string().contains("Unsupported hierarchy version 3"));
    }

    #[test]
    fn test_level_needs_exactly_one_path_form() {
        let none = parse("hierarchy:\n  - name: empty\n").unwrap_err();
        assert!(none.to_string().contains("exactly one of path, paths, glob or globs"));

        let both = parse("hierarchy:\n  - name: both\n    path: a.yaml\n    glob: '*.yaml'\n")
            .unwrap_err();
        assert_eq!(both.kind, ErrorKind::Config);
    }

    #[test]
    fn test_duplicate_and_missing_names() {
        let dup = parse(
            "hierarchy:\n  - name: x\n    path: a.yaml\n  - name: x\n    path: b.yaml\n",
        )
        .unwrap_err();
        assert!(dup.to_string().contains("used more than once"));

        let unnamed = parse("hierarchy:\n  - path: a.yaml\n").unwrap_err();
        assert!(unnamed.to_string().contains("has no name"));
    }

    #[test]
    fn test_lookup_method_not_allowed_in_path() {
        let err = parse("hierarchy:\n  - name: x\n    path: \"%{lookup('a')}.yaml\"\n").unwrap_err();
        assert!(err
            .to_string()
            .contains("Interpolation method 'lookup' is not allowed in hierarchy path"));
    }

    #[test]
    fn test_lookup_options_validated() {
        let hierarchy = parse(
            r#"
hierarchy:
  - name: common
    path: common.yaml
lookup_options:
  one::array:
    merge: unique
  one::settings:
    merge:
      strategy: deep
      knockout_prefix: "--"
"#,
        )
        .unwrap();

        assert_eq!(hierarchy.merge_for("one::array"), Some(&MergeStrategy::Unique));
        assert!(matches!(
            hierarchy.merge_for("one::settings"),
            Some(MergeStrategy::Deep(_))
        ));

        let err = parse(
            r#"
lookup_options:
  one::settings:
    merge:
      strategy: hash
      sort_merged_arrays: true
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert_eq!(err.key.as_deref(), Some("one::settings"));
        assert!(err.to_string().contains("knockout_prefix"));
    }

    #[test]
    fn test_syntax_error_reports_location() {
        let err = parse("hierarchy: [\n").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Unable to parse (/envs/production/hiera.yaml):"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse("hierarchy:\n  - name: x\n    pth: a.yaml\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Parse { .. }));
    }

    #[test]
    fn test_empty_declaration_is_default() {
        let hierarchy = parse("").unwrap();
        assert_eq!(hierarchy.levels[0].name, DEFAULT_LEVEL_NAME);
    }
}
