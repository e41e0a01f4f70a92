//! Lookup explanations
//!
//! A record of what a lookup did: every lookup (including the ones started
//! by interpolation), the levels and data files it consulted, what each file
//! held, and how the result was produced. Renders as indented text and
//! serializes with serde.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::provider::SourceOutcome;
use crate::value::Value;

/// One step of a lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExplainEvent {
    Lookup {
        key: String,
        strategy: String,
    },
    Level {
        layer: String,
        level: String,
    },
    TemplateSkipped {
        template: String,
        variable: String,
    },
    Source {
        location: PathBuf,
        outcome: SourceOutcome,
    },
    Merged {
        strategy: String,
        count: usize,
        value: Value,
    },
    Found {
        value: Value,
    },
    DefaultUsed {
        value: Value,
    },
    NotFound {
        key: String,
    },
}

/// An event and the nesting depth of the lookup that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainEntry {
    pub depth: usize,
    #[serde(flatten)]
    pub event: ExplainEvent,
}

/// Ordered trace of a lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Explanation {
    entries: Vec<ExplainEntry>,
}

impl Explanation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, depth: usize, event: ExplainEvent) {
        self.entries.push(ExplainEntry { depth, event });
    }

    pub fn entries(&self) -> &[ExplainEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let indent = "  ".repeat(entry.depth * 2);
            match &entry.event {
                ExplainEvent::Lookup { key, strategy } => {
                    writeln!(f, "{}Searching for \"{}\" ({} merge)", indent, key, strategy)?
                }
                ExplainEvent::Level { layer, level } => {
                    writeln!(f, "{}  Hierarchy entry \"{}\" in {}", indent, level, layer)?
                }
                ExplainEvent::TemplateSkipped { template, variable } => writeln!(
                    f,
                    "{}    Template \"{}\" skipped, variable '{}' is not bound",
                    indent, template, variable
                )?,
                ExplainEvent::Source { location, outcome } => {
                    writeln!(f, "{}    Path \"{}\"", indent, location.display())?;
                    match outcome {
                        SourceOutcome::Found(value) => {
                            writeln!(f, "{}      Found key: {}", indent, value)?
                        }
                        SourceOutcome::NotFound => writeln!(f, "{}      No such key", indent)?,
                        SourceOutcome::Missing => {
                            writeln!(f, "{}      Path not found", indent)?
                        }
                    }
                }
                ExplainEvent::Merged {
                    strategy,
                    count,
                    value,
                } => writeln!(
                    f,
                    "{}  Merged {} value(s) with '{}' merge: {}",
                    indent, count, strategy, value
                )?,
                ExplainEvent::Found { value } => writeln!(f, "{}  Result: {}", indent, value)?,
                ExplainEvent::DefaultUsed { value } => {
                    writeln!(f, "{}  No value found, using default: {}", indent, value)?
                }
                ExplainEvent::NotFound { key } => {
                    writeln!(f, "{}  No value found for \"{}\"", indent, key)?
                }
            }
        }
        Ok(())
    }
}
