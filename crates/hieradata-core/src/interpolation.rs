//! Interpolation token parsing
//!
//! Parses interpolation expressions like:
//! - `%{facts.os.family}` - scope variable (default method)
//! - `%{scope('environment')}` - scope variable, explicit method
//! - `%{lookup('ntp::servers')}` / `%{hiera("ntp::servers")}` - spliced sub-lookup
//! - `%{alias('ntp::servers')}` - whole-value sub-lookup, type preserved
//! - `%{literal('%')}` - verbatim text
//!
//! Tokens do not nest: an expression ends at the first `}` outside quotes.

use std::fmt;

use crate::error::{Error, Result};

/// Interpolation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolationMethod {
    Alias,
    Hiera,
    Lookup,
    Literal,
    Scope,
}

impl InterpolationMethod {
    /// Every method, in dispatch-table order
    pub const ALL: [InterpolationMethod; 5] = [
        InterpolationMethod::Alias,
        InterpolationMethod::Hiera,
        InterpolationMethod::Lookup,
        InterpolationMethod::Literal,
        InterpolationMethod::Scope,
    ];

    /// Resolve a method from its name in an expression
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Method name as written in expressions
    pub fn name(&self) -> &'static str {
        match self {
            InterpolationMethod::Alias => "alias",
            InterpolationMethod::Hiera => "hiera",
            InterpolationMethod::Lookup => "lookup",
            InterpolationMethod::Literal => "literal",
            InterpolationMethod::Scope => "scope",
        }
    }
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed `%{...}` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationToken {
    pub method: InterpolationMethod,
    pub argument: String,
}

/// A piece of a parsed string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text outside any expression
    Text(String),
    /// An interpolation expression
    Token(InterpolationToken),
}

/// Tokenizer for strings containing `%{...}` expressions
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given input
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Split the entire input into text and token segments
    pub fn tokenize(&mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();

        while !self.is_eof() {
            if self.check_expression_start() {
                if let Some(token) = self.parse_expression()? {
                    segments.push(Segment::Token(token));
                }
            } else {
                let text = self.collect_text();
                if !text.is_empty() {
                    segments.push(Segment::Text(text));
                }
            }
        }

        Ok(merge_adjacent_text(segments))
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn check_expression_start(&self) -> bool {
        self.current() == Some('%') && self.peek() == Some('{')
    }

    fn collect_text(&mut self) -> String {
        let start = self.pos;
        while !self.is_eof() && !self.check_expression_start() {
            self.advance();
        }
        self.input[start..self.pos].to_string()
    }

    /// Parse an expression starting at `%{`; `%{}` yields no token
    fn parse_expression(&mut self) -> Result<Option<InterpolationToken>> {
        let start = self.pos;
        self.advance(); // %
        self.advance(); // {

        let body_start = self.pos;
        let mut quote: Option<char> = None;

        loop {
            match self.current() {
                None => {
                    return Err(Error::interpolation(format!(
                        "Unterminated interpolation expression '{}'",
                        &self.input[start..]
                    )))
                }
                Some(c) if Some(c) == quote => quote = None,
                Some(c @ ('\'' | '"')) if quote.is_none() => quote = Some(c),
                Some('}') if quote.is_none() => break,
                Some(_) => {}
            }
            self.advance();
        }

        let body = &self.input[body_start..self.pos];
        self.advance(); // }

        parse_body(body.trim())
    }
}

/// Parse the text between `%{` and `}`
fn parse_body(body: &str) -> Result<Option<InterpolationToken>> {
    if body.is_empty() {
        return Ok(None);
    }

    let Some(open) = body.find('(') else {
        return parse_scope_name(body).map(Some);
    };

    let name = body[..open].trim();
    let method = InterpolationMethod::from_name(name).ok_or_else(|| {
        Error::interpolation(format!("Unknown interpolation method '{}'", name)).with_help(
            "Use one of alias, hiera, lookup, literal or scope",
        )
    })?;

    let rest = body[open + 1..].trim_end();
    let Some(inner) = rest.strip_suffix(')') else {
        return Err(Error::interpolation(format!(
            "Missing ')' in interpolation expression '%{{{}}}'",
            body
        )));
    };

    let argument = unquote(inner.trim()).ok_or_else(|| {
        Error::interpolation(format!(
            "Interpolation method '{}' expects a single quoted argument, got '{}'",
            method,
            inner.trim()
        ))
    })?;

    Ok(Some(InterpolationToken {
        method,
        argument: argument.to_string(),
    }))
}

fn parse_scope_name(name: &str) -> Result<InterpolationToken> {
    let valid = name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if !valid {
        return Err(Error::interpolation(format!(
            "Invalid variable name '{}' in interpolation expression",
            name
        )));
    }

    Ok(InterpolationToken {
        method: InterpolationMethod::Scope,
        argument: name.to_string(),
    })
}

/// Strip matching single or double quotes
fn unquote(arg: &str) -> Option<&str> {
    let mut chars = arg.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;
    if first == last && matches!(first, '\'' | '"') {
        Some(&arg[1..arg.len() - 1])
    } else {
        None
    }
}

fn merge_adjacent_text(segments: Vec<Segment>) -> Vec<Segment> {
    let mut result = Vec::new();
    let mut current_text = String::new();

    for segment in segments {
        match segment {
            Segment::Text(s) => current_text.push_str(&s),
            token => {
                if !current_text.is_empty() {
                    result.push(Segment::Text(std::mem::take(&mut current_text)));
                }
                result.push(token);
            }
        }
    }

    if !current_text.is_empty() {
        result.push(Segment::Text(current_text));
    }

    result
}

/// Tokenize a string
pub fn tokenize(input: &str) -> Result<Vec<Segment>> {
    Tokenizer::new(input).tokenize()
}

/// Check if a string contains any `%{` expression start
pub fn contains_interpolation(input: &str) -> bool {
    input.contains("%{")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token(method: InterpolationMethod, argument: &str) -> Segment {
        Segment::Token(InterpolationToken {
            method,
            argument: argument.into(),
        })
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            tokenize("hello world").unwrap(),
            vec![Segment::Text("hello world".into())]
        );
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_bare_name_defaults_to_scope() {
        assert_eq!(
            tokenize("%{facts.os.family}").unwrap(),
            vec![token(InterpolationMethod::Scope, "facts.os.family")]
        );
        assert_eq!(
            tokenize("%{::fqdn}").unwrap(),
            vec![token(InterpolationMethod::Scope, "::fqdn")]
        );
    }

    #[test]
    fn test_method_calls_with_either_quote() {
        assert_eq!(
            tokenize(r#"%{alias("km_target")}"#).unwrap(),
            vec![token(InterpolationMethod::Alias, "km_target")]
        );
        assert_eq!(
            tokenize("%{ lookup( 'ntp::servers' ) }").unwrap(),
            vec![token(InterpolationMethod::Lookup, "ntp::servers")]
        );
        assert_eq!(
            tokenize("%{hiera('x')}").unwrap(),
            vec![token(InterpolationMethod::Hiera, "x")]
        );
        assert_eq!(
            tokenize("%{scope('target_scope')}").unwrap(),
            vec![token(InterpolationMethod::Scope, "target_scope")]
        );
    }

    #[test]
    fn test_literal_may_contain_brace() {
        assert_eq!(
            tokenize("a%{literal('}')}b").unwrap(),
            vec![
                Segment::Text("a".into()),
                token(InterpolationMethod::Literal, "}"),
                Segment::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_mixed_text_and_tokens() {
        assert_eq!(
            tokenize("Value from %{a} and %{lookup('b')}!").unwrap(),
            vec![
                Segment::Text("Value from ".into()),
                token(InterpolationMethod::Scope, "a"),
                Segment::Text(" and ".into()),
                token(InterpolationMethod::Lookup, "b"),
                Segment::Text("!".into()),
            ]
        );
    }

    #[test]
    fn test_empty_expression_is_dropped() {
        assert_eq!(
            tokenize("100%{}{x}").unwrap(),
            vec![Segment::Text("100{x}".into())]
        );
    }

    #[test]
    fn test_percent_without_brace_is_text() {
        assert_eq!(
            tokenize("50% off %").unwrap(),
            vec![Segment::Text("50% off %".into())]
        );
    }

    #[test]
    fn test_unterminated_expression() {
        let err = tokenize("prefix %{facts.os").unwrap_err();
        assert!(err.to_string().contains("Unterminated interpolation expression"));
    }

    #[test]
    fn test_unknown_method() {
        let err = tokenize("%{env('HOME')}").unwrap_err();
        assert!(err.to_string().contains("Unknown interpolation method 'env'"));
    }

    #[test]
    fn test_unquoted_argument_rejected() {
        let err = tokenize("%{lookup(ntp)}").unwrap_err();
        assert!(err.to_string().contains("expects a single quoted argument"));
    }

    #[test]
    fn test_invalid_variable_name() {
        assert!(tokenize("%{a b}").is_err());
    }

    #[test]
    fn test_method_table() {
        assert_eq!(
            InterpolationMethod::from_name("literal"),
            Some(InterpolationMethod::Literal)
        );
        assert_eq!(InterpolationMethod::from_name("env"), None);
    }

    #[test]
    fn test_contains_interpolation() {
        assert!(contains_interpolation("x %{y}"));
        assert!(!contains_interpolation("x % {y}"));
    }
}
