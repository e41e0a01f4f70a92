//! Merge strategies
//!
//! Values found across hierarchy levels arrive in precedence order (highest
//! first) and are combined according to the requested strategy:
//! - `first`: the highest-precedence value, nothing else is inspected
//! - `unique`: sequences (scalars count as one-element sequences) are
//!   concatenated and de-duplicated, keeping first occurrences
//! - `hash`: mappings are unioned, higher-precedence keys win
//! - `deep`: mappings are merged recursively, with knockout, array merge,
//!   unpacking and sorting options
//!
//! Callers describe what they want with [`MergeOptions`]; only a validated
//! [`MergeStrategy`] can combine values, so deep-only options can never
//! reach a non-deep merge.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Merge strategy names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MergeKind {
    #[default]
    First,
    Unique,
    Hash,
    Deep,
}

impl MergeKind {
    /// Resolve a strategy from its name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "first" => Some(MergeKind::First),
            "unique" => Some(MergeKind::Unique),
            "hash" => Some(MergeKind::Hash),
            "deep" => Some(MergeKind::Deep),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergeKind::First => "first",
            MergeKind::Unique => "unique",
            MergeKind::Hash => "hash",
            MergeKind::Deep => "deep",
        }
    }
}

/// Unvalidated merge request, as given by a caller or a declaration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOptions {
    pub kind: MergeKind,
    pub knockout_prefix: Option<String>,
    pub sort_merged_arrays: bool,
    pub merge_hash_arrays: bool,
    pub unpack_arrays: Option<String>,
}

impl MergeOptions {
    pub fn new(kind: MergeKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_knockout_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.knockout_prefix = Some(prefix.into());
        self
    }

    pub fn with_sort_merged_arrays(mut self, sort: bool) -> Self {
        self.sort_merged_arrays = sort;
        self
    }

    pub fn with_merge_hash_arrays(mut self, merge: bool) -> Self {
        self.merge_hash_arrays = merge;
        self
    }

    pub fn with_unpack_arrays(mut self, separator: impl Into<String>) -> Self {
        self.unpack_arrays = Some(separator.into());
        self
    }

    /// True when any deep-only option is set
    pub fn has_deep_options(&self) -> bool {
        self.knockout_prefix.as_deref().is_some_and(|p| !p.is_empty())
            || self.sort_merged_arrays
            || self.merge_hash_arrays
            || self.unpack_arrays.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Validate into a strategy; deep-only options require `deep`
    pub fn strategy(&self) -> Result<MergeStrategy> {
        if self.kind != MergeKind::Deep && self.has_deep_options() {
            return Err(Error::deep_options_without_deep(self.kind.name()));
        }

        Ok(match self.kind {
            MergeKind::First => MergeStrategy::First,
            MergeKind::Unique => MergeStrategy::Unique,
            MergeKind::Hash => MergeStrategy::Hash,
            MergeKind::Deep => MergeStrategy::Deep(DeepMergeOptions {
                knockout_prefix: self.knockout_prefix.clone().filter(|p| !p.is_empty()),
                sort_merged_arrays: self.sort_merged_arrays,
                merge_hash_arrays: self.merge_hash_arrays,
                unpack_arrays: self.unpack_arrays.clone().filter(|s| !s.is_empty()),
            }),
        })
    }

    /// Read a merge declaration: a strategy name, or a mapping with a
    /// `strategy` key and deep merge options
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::new(merge_kind(name)?)),
            Value::Mapping(map) => {
                let mut options = match map.get("strategy") {
                    Some(Value::String(name)) => Self::new(merge_kind(name)?),
                    Some(other) => {
                        return Err(Error::config(format!(
                            "Merge strategy must be a string, got {}",
                            other.type_name()
                        )))
                    }
                    None => return Err(Error::config("Merge declaration has no 'strategy'")),
                };

                for (key, option) in map {
                    match (key.as_str(), option) {
                        ("strategy", _) => {}
                        ("knockout_prefix", Value::String(p)) => {
                            options.knockout_prefix = Some(p.clone())
                        }
                        ("unpack_arrays", Value::String(s)) => {
                            options.unpack_arrays = Some(s.clone())
                        }
                        ("sort_merged_arrays", Value::Bool(b)) => options.sort_merged_arrays = *b,
                        ("merge_hash_arrays", Value::Bool(b)) => options.merge_hash_arrays = *b,
                        (
                            "knockout_prefix" | "unpack_arrays" | "sort_merged_arrays"
                            | "merge_hash_arrays",
                            other,
                        ) => {
                            return Err(Error::config(format!(
                                "Invalid value for merge option '{}': {}",
                                key, other
                            )))
                        }
                        (unknown, _) => {
                            return Err(Error::config(format!(
                                "Unknown merge option '{}'",
                                unknown
                            )))
                        }
                    }
                }

                Ok(options)
            }
            other => Err(Error::config(format!(
                "Merge declaration must be a string or a mapping, got {}",
                other.type_name()
            ))),
        }
    }
}

fn merge_kind(name: &str) -> Result<MergeKind> {
    MergeKind::from_name(name).ok_or_else(|| {
        Error::config(format!("Unknown merge strategy '{}'", name))
            .with_help("Use one of first, unique, hash or deep")
    })
}

/// Options that only apply to deep merges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepMergeOptions {
    /// Prefix marking a key or array element for removal
    pub knockout_prefix: Option<String>,
    /// Sort every array in the result once merging is done
    pub sort_merged_arrays: bool,
    /// Merge arrays position by position instead of concatenating
    pub merge_hash_arrays: bool,
    /// Split string elements of arrays on this separator before merging
    pub unpack_arrays: Option<String>,
}

/// A validated merge strategy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    #[default]
    First,
    Unique,
    Hash,
    Deep(DeepMergeOptions),
}

impl MergeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::First => "first",
            MergeStrategy::Unique => "unique",
            MergeStrategy::Hash => "hash",
            MergeStrategy::Deep(_) => "deep",
        }
    }

    /// True when only the first found value matters
    pub fn is_first(&self) -> bool {
        matches!(self, MergeStrategy::First)
    }

    /// Combine values found across the hierarchy, highest precedence first
    pub fn combine(&self, values: Vec<Value>) -> Result<Option<Value>> {
        let mut values = values.into_iter();
        let Some(first) = values.next() else {
            return Ok(None);
        };

        let merged = match self {
            MergeStrategy::First => first,
            MergeStrategy::Unique => {
                let mut merged = Vec::new();
                for value in std::iter::once(first).chain(values) {
                    match value {
                        Value::Sequence(seq) => merged.extend(seq),
                        Value::Mapping(_) => return Err(Error::merge_type("unique", "mapping")),
                        scalar => merged.push(scalar),
                    }
                }
                Value::Sequence(dedupe(merged))
            }
            MergeStrategy::Hash => {
                let mut merged = expect_mapping("hash", first)?;
                for value in values {
                    for (key, lower) in expect_mapping("hash", value)? {
                        merged.entry(key).or_insert(lower);
                    }
                }
                Value::Mapping(merged)
            }
            MergeStrategy::Deep(options) => {
                let sources = std::iter::once(first)
                    .chain(values)
                    .map(|value| expect_mapping("deep", value).map(Value::Mapping))
                    .collect::<Result<Vec<_>>>()?;
                let single = sources.len() == 1;

                // Fold from the lowest level so `higher` is always an unmerged source
                let mut ascending = sources.into_iter().rev();
                let Some(mut merged) = ascending.next() else {
                    return Ok(None);
                };
                if single {
                    merged = strip_markers(merged, options);
                }
                for higher in ascending {
                    merged = deep_merge(higher, merged, options);
                }
                if options.sort_merged_arrays {
                    sort_arrays(&mut merged);
                }
                merged
            }
        };

        Ok(Some(merged))
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn expect_mapping(strategy: &str, value: Value) -> Result<IndexMap<String, Value>> {
    match value {
        Value::Mapping(map) => Ok(map),
        other => Err(Error::merge_type(strategy, other.type_name())),
    }
}

/// Remove duplicates, keeping the first occurrence
fn dedupe(values: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !result.contains(&value) {
            result.push(value);
        }
    }
    result
}

fn knocked_out<'a>(value: &'a str, options: &DeepMergeOptions) -> Option<&'a str> {
    options
        .knockout_prefix
        .as_deref()
        .and_then(|prefix| value.strip_prefix(prefix))
}

/// Merge `lower` underneath `higher`
fn deep_merge(higher: Value, lower: Value, options: &DeepMergeOptions) -> Value {
    match (higher, lower) {
        (Value::Mapping(high), Value::Mapping(mut low)) => {
            let mut merged = IndexMap::with_capacity(high.len() + low.len());

            for (key, value) in high {
                // `--key: ...` removes `key`
                if let Some(target) = knocked_out(&key, options) {
                    low.shift_remove(target);
                    continue;
                }
                // `key: "--"` (or any value with the prefix) removes `key`
                if value.as_str().is_some_and(|s| knocked_out(s, options).is_some()) {
                    low.shift_remove(&key);
                    continue;
                }
                let value = match low.shift_remove(&key) {
                    Some(lower_value) => deep_merge(value, lower_value, options),
                    None => strip_markers(value, options),
                };
                merged.insert(key, value);
            }

            for (key, value) in low {
                merged.entry(key).or_insert(value);
            }

            Value::Mapping(merged)
        }
        (Value::Sequence(high), Value::Sequence(low)) => {
            let high = unpack(high, options);
            let low = unpack(low, options);
            if options.merge_hash_arrays {
                Value::Sequence(merge_positional(high, low, options))
            } else {
                Value::Sequence(merge_concat(high, low, options))
            }
        }
        (Value::Sequence(high), Value::String(low)) if options.unpack_arrays.is_some() => {
            deep_merge(Value::Sequence(high), Value::Sequence(vec![Value::String(low)]), options)
        }
        (Value::String(high), Value::Sequence(low)) if options.unpack_arrays.is_some() => {
            deep_merge(Value::Sequence(vec![Value::String(high)]), Value::Sequence(low), options)
        }
        (higher, _) => strip_markers(higher, options),
    }
}

/// Split string elements on the unpack separator
fn unpack(values: Vec<Value>, options: &DeepMergeOptions) -> Vec<Value> {
    let Some(separator) = options.unpack_arrays.as_deref() else {
        return values;
    };

    values
        .into_iter()
        .flat_map(|value| match value {
            Value::String(s) => s
                .split(separator)
                .map(|part| Value::String(part.to_string()))
                .collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

/// Split `high` into its own elements and the values its markers knock out
fn split_knockouts(high: Vec<Value>, options: &DeepMergeOptions) -> (Vec<Value>, Vec<Value>) {
    let mut kept = Vec::with_capacity(high.len());
    let mut knockouts = Vec::new();
    for value in high {
        match value.as_str().and_then(|s| knocked_out(s, options)) {
            Some(target) => knockouts.push(Value::from(target)),
            None => kept.push(value),
        }
    }
    (kept, knockouts)
}

/// Concatenate in precedence order, dropping duplicates and knocked-out elements
fn merge_concat(high: Vec<Value>, low: Vec<Value>, options: &DeepMergeOptions) -> Vec<Value> {
    let (high, knockouts) = split_knockouts(high, options);
    let combined = high
        .into_iter()
        .map(|v| strip_markers(v, options))
        .chain(low.into_iter().filter(|v| !knockouts.contains(v)))
        .collect();

    dedupe(combined)
}

/// Merge element by element, the index acting as the key
fn merge_positional(high: Vec<Value>, low: Vec<Value>, options: &DeepMergeOptions) -> Vec<Value> {
    let (high, knockouts) = split_knockouts(high, options);
    let mut low = low.into_iter().filter(|v| !knockouts.contains(v));
    let mut merged: Vec<Value> = high
        .into_iter()
        .map(|h| match low.next() {
            Some(l) => deep_merge(h, l, options),
            None => strip_markers(h, options),
        })
        .collect();
    merged.extend(low);
    merged
}

fn sort_arrays(value: &mut Value) {
    match value {
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                sort_arrays(item);
            }
            seq.sort_by(|a, b| a.sort_cmp(b));
        }
        Value::Mapping(map) => {
            for item in map.values_mut() {
                sort_arrays(item);
            }
        }
        _ => {}
    }
}

/// Drop knockout markers from a value that has nothing beneath it
fn strip_markers(value: Value, options: &DeepMergeOptions) -> Value {
    if options.knockout_prefix.is_none() {
        return value;
    }
    let is_marker = |v: &Value| v.as_str().is_some_and(|s| knocked_out(s, options).is_some());
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .filter(|(key, v)| knocked_out(key, options).is_none() && !is_marker(v))
                .map(|(key, v)| (key, strip_markers(v, options)))
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(
            seq.into_iter()
                .filter(|v| !is_marker(v))
                .map(|v| strip_markers(v, options))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn yaml(text: &str) -> Value {
        Value::from(serde_yaml::from_str::<serde_yaml::Value>(text).unwrap())
    }

    fn deep() -> DeepMergeOptions {
        DeepMergeOptions::default()
    }

    #[test]
    fn test_first_returns_highest_precedence() {
        let merged = MergeStrategy::First
            .combine(vec![Value::from("env"), Value::from("module")])
            .unwrap();
        assert_eq!(merged, Some(Value::from("env")));
    }

    #[test]
    fn test_nothing_to_combine() {
        assert_eq!(MergeStrategy::Hash.combine(vec![]).unwrap(), None);
    }

    #[test]
    fn test_unique_dedupes_in_order() {
        let merged = MergeStrategy::Unique
            .combine(vec![yaml("[a, b]"), yaml("[b, c]")])
            .unwrap();
        assert_eq!(merged, Some(yaml("[a, b, c]")));
    }

    #[test]
    fn test_unique_wraps_scalars() {
        let merged = MergeStrategy::Unique
            .combine(vec![Value::from("first"), yaml("[second, first]"), Value::from("third")])
            .unwrap();
        assert_eq!(merged, Some(yaml("[first, second, third]")));
    }

    #[test]
    fn test_unique_rejects_mapping() {
        let err = MergeStrategy::Unique
            .combine(vec![yaml("[a]"), yaml("{k: v}")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MergeType);
    }

    #[test]
    fn test_hash_higher_precedence_wins() {
        let merged = MergeStrategy::Hash
            .combine(vec![
                yaml("{key1: env 1, shared: env}"),
                yaml("{key2: module 2, shared: module}"),
            ])
            .unwrap();
        assert_eq!(
            merged,
            Some(yaml("{key1: env 1, shared: env, key2: module 2}"))
        );
    }

    #[test]
    fn test_hash_is_shallow() {
        let merged = MergeStrategy::Hash
            .combine(vec![yaml("{db: {host: a}}"), yaml("{db: {port: 5432}}")])
            .unwrap();
        assert_eq!(merged, Some(yaml("{db: {host: a}}")));
    }

    #[test]
    fn test_hash_rejects_non_mapping() {
        let err = MergeStrategy::Hash
            .combine(vec![yaml("{a: 1}"), yaml("[1]")])
            .unwrap_err();
        assert!(err.to_string().contains("'hash' merge cannot combine a value of type sequence"));
    }

    #[test]
    fn test_deep_merges_nested_mappings() {
        let merged = MergeStrategy::Deep(deep())
            .combine(vec![
                yaml("{db: {host: prod, opts: {ssl: true}}}"),
                yaml("{db: {host: dev, port: 5432, opts: {timeout: 5}}}"),
            ])
            .unwrap();
        assert_eq!(
            merged,
            Some(yaml("{db: {host: prod, opts: {ssl: true, timeout: 5}, port: 5432}}"))
        );
    }

    #[test]
    fn test_deep_concatenates_arrays() {
        let merged = MergeStrategy::Deep(deep())
            .combine(vec![yaml("{users: [alice, bob]}"), yaml("{users: [bob, carol]}")])
            .unwrap();
        assert_eq!(merged, Some(yaml("{users: [alice, bob, carol]}")));
    }

    #[test]
    fn test_deep_knockout_key_and_element() {
        let options = DeepMergeOptions {
            knockout_prefix: Some("--".into()),
            ..deep()
        };
        let merged = MergeStrategy::Deep(options)
            .combine(vec![
                yaml("{remove_me: '--', --gone: x, users: ['--bob']}"),
                yaml("{remove_me: 1, gone: 2, kept: 3, users: [alice, bob]}"),
            ])
            .unwrap();
        assert_eq!(merged, Some(yaml("{users: [alice], kept: 3}")));
    }

    #[test]
    fn test_deep_merge_hash_arrays_positional() {
        let options = DeepMergeOptions {
            merge_hash_arrays: true,
            ..deep()
        };
        let merged = MergeStrategy::Deep(options)
            .combine(vec![
                yaml("{vhosts: [{name: a}, {name: b}]}"),
                yaml("{vhosts: [{port: 80}, {port: 81}, {port: 82}]}"),
            ])
            .unwrap();
        assert_eq!(
            merged,
            Some(yaml(
                "{vhosts: [{name: a, port: 80}, {name: b, port: 81}, {port: 82}]}"
            ))
        );
    }

    #[test]
    fn test_deep_unpack_arrays() {
        let options = DeepMergeOptions {
            unpack_arrays: Some(",".into()),
            ..deep()
        };
        let merged = MergeStrategy::Deep(options)
            .combine(vec![yaml("{hosts: ['a,b']}"), yaml("{hosts: 'b,c'}")])
            .unwrap();
        assert_eq!(merged, Some(yaml("{hosts: [a, b, c]}")));
    }

    #[test]
    fn test_deep_sort_merged_arrays() {
        let options = DeepMergeOptions {
            sort_merged_arrays: true,
            ..deep()
        };
        let merged = MergeStrategy::Deep(options)
            .combine(vec![yaml("{n: [3, 1]}"), yaml("{n: [2]}")])
            .unwrap();
        assert_eq!(merged, Some(yaml("{n: [1, 2, 3]}")));
    }

    fn knockout() -> DeepMergeOptions {
        DeepMergeOptions {
            knockout_prefix: Some("--".into()),
            ..deep()
        }
    }

    #[test]
    fn test_deep_keeps_prefixed_lower_data() {
        let merged = MergeStrategy::Deep(knockout())
            .combine(vec![
                yaml("{a: 1}"),
                yaml("{flags: ['--verbose'], opt: '--fast'}"),
            ])
            .unwrap();
        assert_eq!(
            merged,
            Some(yaml("{a: 1, flags: ['--verbose'], opt: '--fast'}"))
        );
    }

    #[test]
    fn test_deep_middle_level_markers_apply_below() {
        let merged = MergeStrategy::Deep(knockout())
            .combine(vec![
                yaml("{top: 1}"),
                yaml("{opt: '--fast', flags: ['--verbose']}"),
                yaml("{fast: 2, opt: slow, flags: [verbose]}"),
            ])
            .unwrap();
        assert_eq!(
            merged,
            Some(yaml("{top: 1, flags: [], fast: 2}"))
        );
    }

    #[test]
    fn test_deep_single_source_drops_its_markers() {
        let merged = MergeStrategy::Deep(knockout())
            .combine(vec![yaml("{a: '--', --b: 1, c: [x, '--y'], d: {e: '--'}}")])
            .unwrap();
        assert_eq!(merged, Some(yaml("{c: [x], d: {}}")));
    }

    #[test]
    fn test_deep_positional_knockout_removes_lower_element() {
        let options = DeepMergeOptions {
            merge_hash_arrays: true,
            ..knockout()
        };
        let merged = MergeStrategy::Deep(options)
            .combine(vec![
                yaml("{list: ['--b', {name: a, --port: x}]}"),
                yaml("{list: [b, {port: 80, host: h}, c]}"),
            ])
            .unwrap();
        assert_eq!(merged, Some(yaml("{list: [{name: a, host: h}, c]}")));
    }

    #[test]
    fn test_deep_rejects_non_mapping_values() {
        let err = MergeStrategy::Deep(deep())
            .combine(vec![Value::from("x"), Value::from("y")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MergeType);

        let err = MergeStrategy::Deep(deep())
            .combine(vec![yaml("[a]"), yaml("[b]")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MergeType);

        assert!(MergeStrategy::Deep(deep())
            .combine(vec![Value::Integer(1)])
            .is_err());
    }

    #[test]
    fn test_deep_rejects_mixed_top_level() {
        let err = MergeStrategy::Deep(deep())
            .combine(vec![yaml("{a: 1}"), Value::from("scalar")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MergeType);
    }

    #[test]
    fn test_deep_options_require_deep() {
        for options in [
            MergeOptions::new(MergeKind::Hash).with_knockout_prefix("--"),
            MergeOptions::new(MergeKind::First).with_sort_merged_arrays(true),
            MergeOptions::new(MergeKind::Unique).with_merge_hash_arrays(true),
            MergeOptions::new(MergeKind::Hash).with_unpack_arrays(","),
        ] {
            let err = options.strategy().unwrap_err();
            assert_eq!(err.kind, ErrorKind::Config);
            assert!(err.to_string().contains("merge_hash_arrays"));
        }

        let strategy = MergeOptions::new(MergeKind::Deep)
            .with_knockout_prefix("--")
            .strategy()
            .unwrap();
        assert_eq!(
            strategy,
            MergeStrategy::Deep(DeepMergeOptions {
                knockout_prefix: Some("--".into()),
                ..deep()
            })
        );
    }

    #[test]
    fn test_empty_prefix_is_unset() {
        let strategy = MergeOptions::new(MergeKind::Hash)
            .with_knockout_prefix("")
            .strategy()
            .unwrap();
        assert_eq!(strategy, MergeStrategy::Hash);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(
            MergeOptions::from_value(&Value::from("unique")).unwrap(),
            MergeOptions::new(MergeKind::Unique)
        );
        assert_eq!(
            MergeOptions::from_value(&yaml(
                "{strategy: deep, knockout_prefix: '--', merge_hash_arrays: true}"
            ))
            .unwrap(),
            MergeOptions::new(MergeKind::Deep)
                .with_knockout_prefix("--")
                .with_merge_hash_arrays(true)
        );
        assert!(MergeOptions::from_value(&Value::from("shallow")).is_err());
        assert!(MergeOptions::from_value(&yaml("{knockout_prefix: '--'}")).is_err());
        assert!(MergeOptions::from_value(&yaml("{strategy: deep, colour: red}")).is_err());
        assert!(MergeOptions::from_value(&yaml("{strategy: deep, sort_merged_arrays: 1}")).is_err());
    }
}
