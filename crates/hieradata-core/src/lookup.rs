//! Lookups
//!
//! [`LookupEngine`] resolves a [`LookupRequest`] against an [`Environment`]:
//!
//! 1. the request's merge options are validated, before any data is read
//! 2. for each requested name, the global, environment and (for qualified
//!    keys) module hierarchies are expanded against the scope
//! 3. each data source is asked for the key's root; found values are
//!    interpolated, recursing into the engine for `alias`/`hiera`/`lookup`
//! 4. `first` stops at the first value, other strategies merge all of them
//! 5. dig segments are applied and the result is checked against the
//!    expected type
//!
//! A miss falls back to the request's default, then to its default function,
//! and otherwise fails with a not found error.
//!
//! # Example
//!
//! ```no_run
//! use hieradata_core::{Environment, LookupEngine, LookupRequest, Scope};
//!
//! let env = Environment::builder("production", "/etc/puppetlabs/code/environments/production")
//!     .modulepath("/etc/puppetlabs/code/environments/production/modules")
//!     .build()?;
//! let scope = Scope::new().with("environment", "production");
//!
//! let servers = LookupEngine::new(&env).lookup(&LookupRequest::new("ntp::servers"), &scope)?;
//! println!("{}", servers);
//! # Ok::<(), hieradata_core::Error>(())
//! ```

use std::cell::RefCell;
use std::fmt;

use crate::datasource::HierarchyResolver;
use crate::environment::{Environment, Layer, ModuleEligibility};
use crate::error::{Error, Result};
use crate::explain::{ExplainEvent, Explanation};
use crate::interpolator::{InterpolationStack, Interpolator, KeyLookup};
use crate::key::LookupKey;
use crate::merge::{MergeOptions, MergeStrategy};
use crate::provider::{DataProvider, SourceOutcome};
use crate::scope::Scope;
use crate::types::ExpectedType;
use crate::value::Value;

/// Computes a default from the first requested name
pub type DefaultFn = Box<dyn Fn(&str) -> Value + Send + Sync>;

/// What to look up and how
#[derive(Default)]
pub struct LookupRequest {
    pub names: Vec<String>,
    pub expected_type: ExpectedType,
    pub merge: Option<MergeOptions>,
    pub default: Option<Value>,
    pub default_fn: Option<DefaultFn>,
}

impl LookupRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            ..Self::default()
        }
    }

    /// Look up several names; the first that yields a value wins
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, expected_type: ExpectedType) -> Self {
        self.expected_type = expected_type;
        self
    }

    pub fn with_merge(mut self, merge: MergeOptions) -> Self {
        self.merge = Some(merge);
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_default_fn(mut self, default_fn: impl Fn(&str) -> Value + Send + Sync + 'static) -> Self {
        self.default_fn = Some(Box::new(default_fn));
        self
    }
}

impl fmt::Debug for LookupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupRequest")
            .field("names", &self.names)
            .field("expected_type", &self.expected_type)
            .field("merge", &self.merge)
            .field("default", &self.default)
            .field("default_fn", &self.default_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A lookup result with the trace of how it was produced
#[derive(Debug)]
pub struct Explained {
    pub result: Result<Value>,
    pub explanation: Explanation,
}

/// Resolves lookup requests against an environment
pub struct LookupEngine<'env> {
    env: &'env Environment,
}

impl<'env> LookupEngine<'env> {
    pub fn new(env: &'env Environment) -> Self {
        Self { env }
    }

    /// Look up a request
    pub fn lookup(&self, request: &LookupRequest, scope: &Scope) -> Result<Value> {
        let invocation = Invocation {
            env: self.env,
            scope,
            trace: None,
        };
        invocation.run(request)
    }

    /// Look up a single key with no type, merge or default
    pub fn lookup_key(&self, key: &str, scope: &Scope) -> Result<Value> {
        self.lookup(&LookupRequest::new(key), scope)
    }

    /// Look up a request, recording every step
    pub fn explain(&self, request: &LookupRequest, scope: &Scope) -> Explained {
        let invocation = Invocation {
            env: self.env,
            scope,
            trace: Some(RefCell::new(Explanation::new())),
        };
        let result = invocation.run(request);
        Explained {
            result,
            explanation: invocation.trace.map(RefCell::into_inner).unwrap_or_default(),
        }
    }
}

/// State of one top-level lookup call
struct Invocation<'a> {
    env: &'a Environment,
    scope: &'a Scope,
    trace: Option<RefCell<Explanation>>,
}

impl Invocation<'_> {
    fn run(&self, request: &LookupRequest) -> Result<Value> {
        if request.names.is_empty() {
            return Err(Error::config("No keys were given to lookup"));
        }

        let keys = request
            .names
            .iter()
            .map(|name| LookupKey::parse(name))
            .collect::<Result<Vec<_>>>()?;

        let strategy = request.merge.as_ref().map(MergeOptions::strategy).transpose()?;

        for key in &keys {
            let mut stack = InterpolationStack::new();
            let found = stack.within(key.as_str(), |stack| {
                self.find(key, strategy.as_ref(), stack)
            })?;

            if let Some(value) = found {
                request
                    .expected_type
                    .check("Found value", &value)
                    .map_err(|e| e.with_key(key.as_str()))?;
                return Ok(value);
            }
        }

        let default = match (&request.default, &request.default_fn) {
            (Some(value), _) => Some(value.clone()),
            (None, Some(default_fn)) => Some(default_fn(&request.names[0])),
            (None, None) => None,
        };

        match default {
            Some(value) => {
                request.expected_type.check("Default value", &value)?;
                self.record(0, ExplainEvent::DefaultUsed { value: value.clone() });
                Ok(value)
            }
            None => Err(Error::not_found(request.names.clone())),
        }
    }

    /// Resolve one key; `key` is already on the stack
    fn find(
        &self,
        key: &LookupKey,
        explicit: Option<&MergeStrategy>,
        stack: &mut InterpolationStack,
    ) -> Result<Option<Value>> {
        let depth = stack.depth().saturating_sub(1);
        let strategy = explicit
            .or_else(|| self.env.declared_merge(key))
            .cloned()
            .unwrap_or_default();

        self.record(
            depth,
            ExplainEvent::Lookup {
                key: key.as_str().to_string(),
                strategy: strategy.name().to_string(),
            },
        );

        let mut values = Vec::new();
        for layer in self.env.primary_layers() {
            self.collect(layer, key, &strategy, depth, stack, &mut values)?;
            if strategy.is_first() && !values.is_empty() {
                break;
            }
        }

        if let Some(module) = self.env.module_for(key) {
            let include = values.is_empty()
                || (!strategy.is_first()
                    && self.env.module_eligibility() == ModuleEligibility::Aggregate);
            if include {
                self.collect(module, key, &strategy, depth, stack, &mut values)?;
            }
        }

        let count = values.len();
        let merged = strategy
            .combine(values)
            .map_err(|e| e.with_key(key.as_str()))?;

        let found = merged.and_then(|value| {
            if !strategy.is_first() {
                self.record(
                    depth,
                    ExplainEvent::Merged {
                        strategy: strategy.name().to_string(),
                        count,
                        value: value.clone(),
                    },
                );
            }
            match key.segments() {
                [] => Some(value),
                segments => value.dig(segments).cloned(),
            }
        });

        match &found {
            Some(value) => self.record(depth, ExplainEvent::Found { value: value.clone() }),
            None => self.record(
                depth,
                ExplainEvent::NotFound {
                    key: key.as_str().to_string(),
                },
            ),
        }

        Ok(found)
    }

    /// Gather interpolated values for `key` from every level of a layer
    fn collect(
        &self,
        layer: &Layer,
        key: &LookupKey,
        strategy: &MergeStrategy,
        depth: usize,
        stack: &mut InterpolationStack,
        values: &mut Vec<Value>,
    ) -> Result<()> {
        let provider = DataProvider::new(self.env.cache(), self.env.backends());
        let layer_name = layer.kind().to_string();

        for level in &layer.hierarchy.levels {
            self.record(
                depth,
                ExplainEvent::Level {
                    layer: layer_name.clone(),
                    level: level.name.clone(),
                },
            );

            let expansion = HierarchyResolver::expand_level(level, self.scope);
            for skipped in expansion.skipped {
                self.record(
                    depth,
                    ExplainEvent::TemplateSkipped {
                        template: skipped.template,
                        variable: skipped.variable,
                    },
                );
            }

            for source in &expansion.sources {
                log::trace!(
                    "Looking for '{}' in {}",
                    key.root(),
                    source.location.display()
                );
                let outcome = provider
                    .lookup(source, key.root())
                    .map_err(|e| e.with_key(key.as_str()))?;
                self.record(
                    depth,
                    ExplainEvent::Source {
                        location: source.location.clone(),
                        outcome: outcome.clone(),
                    },
                );

                if let SourceOutcome::Found(raw) = outcome {
                    let value = Interpolator::new(self.scope, self)
                        .resolve(raw, stack)
                        .map_err(|e| {
                            let e = e.with_key(key.as_str());
                            match e.location {
                                Some(_) => e,
                                None => e.with_location(&source.location),
                            }
                        })?;
                    values.push(value);
                    if strategy.is_first() {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    fn record(&self, depth: usize, event: ExplainEvent) {
        if let Some(trace) = &self.trace {
            trace.borrow_mut().record(depth, event);
        }
    }
}

impl KeyLookup for Invocation<'_> {
    fn lookup_nested(&self, key: &str, stack: &mut InterpolationStack) -> Result<Option<Value>> {
        let key = LookupKey::parse(key)?;
        self.find(&key, None, stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_builders() {
        let request = LookupRequest::with_names(["a", "b"])
            .with_type(ExpectedType::String)
            .with_default("x");

        assert_eq!(request.names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(request.expected_type, ExpectedType::String);
        assert_eq!(request.default, Some(Value::from("x")));
        assert!(format!("{:?}", request).contains("LookupRequest"));
    }

    #[test]
    fn test_default_fn_debug_is_opaque() {
        let request = LookupRequest::new("a").with_default_fn(|name| Value::from(name));

        assert!(format!("{:?}", request).contains("<fn>"));
    }
}
