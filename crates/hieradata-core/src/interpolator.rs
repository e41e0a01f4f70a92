//! Interpolation of found values
//!
//! Walks a value and replaces `%{...}` expressions in its strings. Each
//! method has one handler, selected through [`HANDLERS`]. Methods that look
//! up other keys go back through a [`KeyLookup`], so interpolation and
//! lookup recurse into each other as ordinary calls; an
//! [`InterpolationStack`] owned by the top-level call detects cycles.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::interpolation::{self, InterpolationMethod, InterpolationToken, Segment};
use crate::scope::Scope;
use crate::value::Value;

/// Keys and variables currently being resolved, in the order they were entered
#[derive(Debug, Clone, Default)]
pub struct InterpolationStack {
    entries: Vec<String>,
}

impl InterpolationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if resolving `name` would revisit an entry still in progress
    pub fn would_cause_cycle(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry == name)
    }

    pub fn push(&mut self, name: &str) {
        self.entries.push(name.to_string());
    }

    pub fn pop(&mut self) {
        self.entries.pop();
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Run `f` with `name` pushed, failing first if `name` is already present.
    ///
    /// The entry is popped again whether `f` succeeds or fails.
    pub fn within<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut InterpolationStack) -> Result<T>,
    ) -> Result<T> {
        if self.would_cause_cycle(name) {
            return Err(Error::recursive_lookup(self.entries.clone()));
        }

        self.push(name);
        let result = f(self);
        self.pop();
        result
    }
}

/// Performs the sub-lookups requested by `alias`, `hiera` and `lookup`
pub trait KeyLookup {
    /// Look up `key` on behalf of an interpolation; `None` on a miss.
    ///
    /// `key` has already been pushed onto `stack`.
    fn lookup_nested(&self, key: &str, stack: &mut InterpolationStack) -> Result<Option<Value>>;
}

type Handler = fn(&Interpolator<'_>, &InterpolationToken, &mut InterpolationStack) -> Result<Value>;

/// One handler per interpolation method
const HANDLERS: [(InterpolationMethod, Handler); 5] = [
    (InterpolationMethod::Alias, sub_lookup),
    (InterpolationMethod::Hiera, sub_lookup),
    (InterpolationMethod::Lookup, sub_lookup),
    (InterpolationMethod::Literal, literal),
    (InterpolationMethod::Scope, scope_variable),
];

fn handler_for(method: InterpolationMethod) -> Handler {
    HANDLERS
        .iter()
        .find(|(m, _)| *m == method)
        .map(|(_, handler)| *handler)
        .unwrap_or(literal)
}

fn literal(_: &Interpolator<'_>, token: &InterpolationToken, _: &mut InterpolationStack) -> Result<Value> {
    Ok(Value::String(token.argument.clone()))
}

fn scope_variable(
    interpolator: &Interpolator<'_>,
    token: &InterpolationToken,
    stack: &mut InterpolationStack,
) -> Result<Value> {
    let name = token.argument.strip_prefix("::").unwrap_or(&token.argument);

    match interpolator.scope.get(name) {
        None => Ok(Value::String(String::new())),
        Some(Value::String(s)) if interpolation::contains_interpolation(s) => {
            stack.within(name, |stack| interpolator.resolve_string(s, stack))
        }
        Some(value) => Ok(value.clone()),
    }
}

fn sub_lookup(
    interpolator: &Interpolator<'_>,
    token: &InterpolationToken,
    stack: &mut InterpolationStack,
) -> Result<Value> {
    let key = token.argument.as_str();
    let found = stack.within(key, |stack| interpolator.lookups.lookup_nested(key, stack))?;
    Ok(found.unwrap_or_else(|| Value::String(String::new())))
}

/// Resolves interpolation expressions against a scope
pub struct Interpolator<'a> {
    scope: &'a Scope,
    lookups: &'a dyn KeyLookup,
}

impl<'a> Interpolator<'a> {
    pub fn new(scope: &'a Scope, lookups: &'a dyn KeyLookup) -> Self {
        Self { scope, lookups }
    }

    /// Resolve every string inside a value, including mapping keys
    pub fn resolve(&self, value: Value, stack: &mut InterpolationStack) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_string(&s, stack),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, stack))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(key, item)| -> Result<(String, Value)> {
                    let key = self.resolve_string(&key, stack)?.to_interpolated_string();
                    Ok((key, self.resolve(item, stack)?))
                })
                .collect::<Result<IndexMap<_, _>>>()
                .map(Value::Mapping),
            scalar => Ok(scalar),
        }
    }

    /// Resolve one string.
    ///
    /// An `alias` expression must be the whole string and yields the
    /// aliased value unchanged; every other expression is spliced in as text.
    pub fn resolve_string(&self, input: &str, stack: &mut InterpolationStack) -> Result<Value> {
        if !interpolation::contains_interpolation(input) {
            return Ok(Value::String(input.to_string()));
        }

        let segments = interpolation::tokenize(input)?;

        if let [Segment::Token(token)] = segments.as_slice() {
            if token.method == InterpolationMethod::Alias {
                return handler_for(token.method)(self, token, stack);
            }
        }

        let mut output = String::new();
        for segment in &segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Token(token) if token.method == InterpolationMethod::Alias => {
                    return Err(Error::alias_not_entire_string());
                }
                Segment::Token(token) => {
                    let value = handler_for(token.method)(self, token, stack)?;
                    output.push_str(&value.to_interpolated_string());
                }
            }
        }

        Ok(Value::String(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    /// Looks keys up in a fixed table, interpolating what it finds
    struct TableLookup<'a> {
        table: IndexMap<String, Value>,
        scope: &'a Scope,
    }

    impl KeyLookup for TableLookup<'_> {
        fn lookup_nested(
            &self,
            key: &str,
            stack: &mut InterpolationStack,
        ) -> Result<Option<Value>> {
            match self.table.get(key) {
                Some(raw) => Interpolator::new(self.scope, self)
                    .resolve(raw.clone(), stack)
                    .map(Some),
                None => Ok(None),
            }
        }
    }

    fn yaml(text: &str) -> Value {
        Value::from(serde_yaml::from_str::<serde_yaml::Value>(text).unwrap())
    }

    fn table(text: &str) -> IndexMap<String, Value> {
        match yaml(text) {
            Value::Mapping(map) => map,
            other => panic!("expected mapping, got {}", other),
        }
    }

    fn resolve(scope: &Scope, data: &str, input: &str) -> Result<Value> {
        let lookups = TableLookup {
            table: table(data),
            scope,
        };
        let mut stack = InterpolationStack::new();
        Interpolator::new(scope, &lookups).resolve(Value::from(input), &mut stack)
    }

    #[test]
    fn test_scope_variables_spliced() {
        let scope = Scope::new().with("environment", "production").with("port", 8080);

        assert_eq!(
            resolve(&scope, "{}", "%{environment}:%{::port}:%{scope('environment')}").unwrap(),
            Value::from("production:8080:production")
        );
    }

    #[test]
    fn test_unbound_variable_is_empty() {
        assert_eq!(
            resolve(&Scope::new(), "{}", "[%{nope}]").unwrap(),
            Value::from("[]")
        );
    }

    #[test]
    fn test_literal_not_interpolated_further() {
        assert_eq!(
            resolve(&Scope::new(), "{}", "%{literal('%')}{x}").unwrap(),
            Value::from("%{x}")
        );
    }

    #[test]
    fn test_lookup_and_hiera_stringify() {
        let data = "servers: [a, b]\nport: 123\n";
        assert_eq!(
            resolve(&Scope::new(), data, "port=%{lookup('port')}").unwrap(),
            Value::from("port=123")
        );
        assert_eq!(
            resolve(&Scope::new(), data, "%{hiera('servers')}").unwrap(),
            Value::from("[a, b]")
        );
    }

    #[test]
    fn test_alias_preserves_type() {
        let data = "servers: [a, b]\n";
        assert_eq!(
            resolve(&Scope::new(), data, "%{alias('servers')}").unwrap(),
            yaml("[a, b]")
        );
    }

    #[test]
    fn test_alias_with_surrounding_text() {
        let err = resolve(&Scope::new(), "x: 1\n", "prefix %{alias(\"x\")}").unwrap_err();

        assert_eq!(err.kind, ErrorKind::Interpolation);
        assert!(err.to_string().contains(
            "'alias' interpolation is only permitted if the expression is equal to the entire string"
        ));
    }

    #[test]
    fn test_missing_sub_lookup_is_empty() {
        assert_eq!(
            resolve(&Scope::new(), "{}", "<%{lookup('missing')}>").unwrap(),
            Value::from("<>")
        );
        assert_eq!(
            resolve(&Scope::new(), "{}", "%{alias('missing')}").unwrap(),
            Value::from("")
        );
    }

    #[test]
    fn test_nested_values_resolved() {
        let scope = Scope::new().with("dc", "ams");
        let lookups = TableLookup {
            table: IndexMap::new(),
            scope: &scope,
        };
        let mut stack = InterpolationStack::new();

        let resolved = Interpolator::new(&scope, &lookups)
            .resolve(yaml("{'%{dc}_hosts': ['%{dc}1', 2]}"), &mut stack)
            .unwrap();

        assert_eq!(resolved, yaml("{ams_hosts: [ams1, 2]}"));
    }

    #[test]
    fn test_lookup_cycle_reports_chain() {
        let data = "a: \"%{lookup('b')}\"\nb: \"%{lookup('a')}\"\n";
        let err = resolve(&Scope::new(), data, "%{lookup('a')}").unwrap_err();

        assert_eq!(
            err.kind,
            ErrorKind::RecursiveLookup {
                chain: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_scope_cycle_reports_chain() {
        let scope = Scope::new().with("r1", "%{r2}").with("r2", "%{r1}");
        let lookups = TableLookup {
            table: IndexMap::new(),
            scope: &scope,
        };
        let mut stack = InterpolationStack::new();
        stack.push("recursive");

        let err = Interpolator::new(&scope, &lookups)
            .resolve(Value::from("%{r1}"), &mut stack)
            .unwrap_err();

        assert!(err
            .to_string()
            .contains("Recursive lookup detected in [recursive, r1, r2]"));
    }

    #[test]
    fn test_sibling_tokens_do_not_collide() {
        let data = "x: 1\n";
        assert_eq!(
            resolve(&Scope::new(), data, "%{lookup('x')}-%{lookup('x')}").unwrap(),
            Value::from("1-1")
        );
    }

    #[test]
    fn test_stack_popped_after_failure() {
        let mut stack = InterpolationStack::new();
        let result: Result<()> = stack.within("a", |_| Err(Error::interpolation("boom")));

        assert!(result.is_err());
        assert_eq!(stack.depth(), 0);
        assert!(!stack.would_cause_cycle("a"));
    }

    #[test]
    fn test_handler_table_covers_every_method() {
        for method in InterpolationMethod::ALL {
            assert!(HANDLERS.iter().any(|(m, _)| *m == method), "{}", method);
        }
    }
}
