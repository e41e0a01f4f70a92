//! Expected value types
//!
//! A small type language used to check a looked-up or default value:
//!
//! ```text
//! Any | Data | Scalar | String | Integer | Float | Numeric | Boolean | Undef
//! Array[T] | Hash[K, V] | Optional[T] | Variant[T1, T2, ...]
//! ```
//!
//! Checking never converts: an Integer satisfies Float and Numeric, nothing
//! else is widened.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::value::Value;

/// An expected value type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExpectedType {
    #[default]
    Any,
    Data,
    Scalar,
    String,
    Integer,
    Float,
    Numeric,
    Boolean,
    Undef,
    Array(Box<ExpectedType>),
    Hash(Box<ExpectedType>, Box<ExpectedType>),
    Optional(Box<ExpectedType>),
    Variant(Vec<ExpectedType>),
}

impl ExpectedType {
    /// Parse a type expression
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = TypeParser { input: text, pos: 0 };
        let parsed = parser.parse_type()?;
        parser.skip_whitespace();
        if parser.pos < text.len() {
            return Err(parser.error("unexpected trailing text"));
        }
        Ok(parsed)
    }

    /// True when the value satisfies this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ExpectedType::Any => true,
            ExpectedType::Data => is_data(value),
            ExpectedType::Scalar => matches!(
                value,
                Value::Bool(_) | Value::Integer(_) | Value::Float(_) | Value::String(_)
            ),
            ExpectedType::String => value.is_string(),
            ExpectedType::Integer => matches!(value, Value::Integer(_)),
            ExpectedType::Float | ExpectedType::Numeric => {
                matches!(value, Value::Integer(_) | Value::Float(_))
            }
            ExpectedType::Boolean => matches!(value, Value::Bool(_)),
            ExpectedType::Undef => value.is_null(),
            ExpectedType::Array(element) => value
                .as_sequence()
                .is_some_and(|items| items.iter().all(|item| element.matches(item))),
            ExpectedType::Hash(key, element) => value.as_mapping().is_some_and(|map| {
                map.iter()
                    .all(|(k, v)| key.matches(&Value::from(k.as_str())) && element.matches(v))
            }),
            ExpectedType::Optional(inner) => value.is_null() || inner.matches(value),
            ExpectedType::Variant(types) => types.iter().any(|t| t.matches(value)),
        }
    }

    /// Fail with a type mismatch naming `what` unless the value matches
    pub fn check(&self, what: &str, value: &Value) -> Result<()> {
        if self.matches(value) {
            Ok(())
        } else {
            Err(Error::type_mismatch(what, self, describe(value)))
        }
    }
}

impl FromStr for ExpectedType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ExpectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedType::Any => write!(f, "Any"),
            ExpectedType::Data => write!(f, "Data"),
            ExpectedType::Scalar => write!(f, "Scalar"),
            ExpectedType::String => write!(f, "String"),
            ExpectedType::Integer => write!(f, "Integer"),
            ExpectedType::Float => write!(f, "Float"),
            ExpectedType::Numeric => write!(f, "Numeric"),
            ExpectedType::Boolean => write!(f, "Boolean"),
            ExpectedType::Undef => write!(f, "Undef"),
            ExpectedType::Array(element) => write!(f, "Array[{}]", element),
            ExpectedType::Hash(key, element) => write!(f, "Hash[{}, {}]", key, element),
            ExpectedType::Optional(inner) => write!(f, "Optional[{}]", inner),
            ExpectedType::Variant(types) => {
                let names: Vec<String> = types.iter().map(ToString::to_string).collect();
                write!(f, "Variant[{}]", names.join(", "))
            }
        }
    }
}

fn is_data(value: &Value) -> bool {
    match value {
        Value::Sequence(items) => items.iter().all(is_data),
        Value::Mapping(map) => map.values().all(is_data),
        _ => true,
    }
}

/// Type name used in mismatch messages
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "Undef".into(),
        Value::Bool(_) => "Boolean".into(),
        Value::Integer(_) => "Integer".into(),
        Value::Float(_) => "Float".into(),
        Value::String(_) => "String".into(),
        Value::Sequence(_) => "Array".into(),
        Value::Mapping(_) => "Hash".into(),
    }
}

struct TypeParser<'a> {
    input: &'a str,
    pos: usize,
}

impl TypeParser<'_> {
    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_whitespace();
        if self.input[self.pos..].starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::config(format!(
            "Invalid type '{}': {} at position {}",
            self.input, message, self.pos
        ))
    }

    fn name(&mut self) -> &str {
        self.skip_whitespace();
        let start = self.pos;
        let len = self.input[start..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(self.input.len() - start);
        self.pos += len;
        &self.input[start..self.pos]
    }

    fn parse_type(&mut self) -> Result<ExpectedType> {
        let name = self.name().to_string();
        let parsed = match name.as_str() {
            "Any" => ExpectedType::Any,
            "Data" => ExpectedType::Data,
            "Scalar" => ExpectedType::Scalar,
            "String" => ExpectedType::String,
            "Integer" => ExpectedType::Integer,
            "Float" => ExpectedType::Float,
            "Numeric" => ExpectedType::Numeric,
            "Boolean" => ExpectedType::Boolean,
            "Undef" => ExpectedType::Undef,
            "Array" => {
                if self.eat('[') {
                    let element = self.parse_type()?;
                    self.expect(']')?;
                    ExpectedType::Array(Box::new(element))
                } else {
                    ExpectedType::Array(Box::new(ExpectedType::Any))
                }
            }
            "Hash" => {
                if self.eat('[') {
                    let key = self.parse_type()?;
                    self.expect(',')?;
                    let element = self.parse_type()?;
                    self.expect(']')?;
                    ExpectedType::Hash(Box::new(key), Box::new(element))
                } else {
                    ExpectedType::Hash(Box::new(ExpectedType::Any), Box::new(ExpectedType::Any))
                }
            }
            "Optional" => {
                self.expect('[')?;
                let inner = self.parse_type()?;
                self.expect(']')?;
                ExpectedType::Optional(Box::new(inner))
            }
            "Variant" => {
                self.expect('[')?;
                let mut types = vec![self.parse_type()?];
                while self.eat(',') {
                    types.push(self.parse_type()?);
                }
                self.expect(']')?;
                ExpectedType::Variant(types)
            }
            "" => return Err(self.error("expected a type name")),
            other => return Err(self.error(&format!("unknown type '{}'", other))),
        };
        Ok(parsed)
    }
}
