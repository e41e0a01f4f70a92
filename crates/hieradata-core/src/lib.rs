//! hieradata-core: Hierarchical configuration-data lookup
//!
//! This crate resolves symbolic keys such as `ntp::servers` into values by
//! searching layered, ordered data sources (global, environment, module),
//! merging what it finds and interpolating `%{...}` expressions.
//!
//! # Example
//!
//! ```rust
//! use hieradata_core::{Environment, LookupEngine, LookupRequest, MergeKind, MergeOptions, Scope};
//!
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::create_dir_all(dir.path().join("data")).unwrap();
//! std::fs::write(
//!     dir.path().join("data/common.yaml"),
//!     "ntp::servers: [0.pool.ntp.org]\nmotd: \"Welcome to %{facts.fqdn}\"\n",
//! )
//! .unwrap();
//!
//! let env = Environment::builder("production", dir.path()).build().unwrap();
//! let scope = Scope::new().with("facts", serde_json::from_str::<serde_json::Value>(
//!     r#"{"fqdn": "web01.example.com"}"#,
//! ).unwrap());
//! let engine = LookupEngine::new(&env);
//!
//! let motd = engine.lookup(&LookupRequest::new("motd"), &scope).unwrap();
//! assert_eq!(motd.as_str(), Some("Welcome to web01.example.com"));
//!
//! let servers = engine
//!     .lookup(
//!         &LookupRequest::new("ntp::servers").with_merge(MergeOptions::new(MergeKind::Unique)),
//!         &scope,
//!     )
//!     .unwrap();
//! assert_eq!(servers.as_sequence().map(|s| s.len()), Some(1));
//! ```

pub mod backend;
pub mod datasource;
pub mod environment;
pub mod error;
pub mod explain;
pub mod hierarchy;
pub mod interpolation;
pub mod interpolator;
pub mod key;
pub mod merge;
pub mod provider;
pub mod scope;
pub mod types;
pub mod value;

mod lookup;

pub use backend::{Backend, BackendError, BackendRegistry};
pub use environment::{CheckStatus, Environment, EnvironmentBuilder, Layer, ModuleEligibility};
pub use error::{Error, ErrorKind, Result};
pub use explain::{ExplainEvent, Explanation};
pub use hierarchy::{LayerKind, ProviderKind};
pub use key::LookupKey;
pub use lookup::{DefaultFn, Explained, LookupEngine, LookupRequest};
pub use merge::{MergeKind, MergeOptions, MergeStrategy};
pub use provider::DataCache;
pub use scope::Scope;
pub use types::ExpectedType;
pub use value::Value;
