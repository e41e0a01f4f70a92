//! Data source expansion
//!
//! Turns hierarchy levels into the concrete, ordered list of data files to
//! consult for a given scope. Templates referencing an unbound variable are
//! skipped; glob templates expand to every matching file in sorted order.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::hierarchy::{HierarchyLevel, PathTemplate, ProviderKind, TemplateKind};
use crate::interpolation::{InterpolationMethod, Segment};
use crate::scope::Scope;
use crate::value::Value;

/// One concrete data file
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub level_name: String,
    pub location: PathBuf,
    pub provider: ProviderKind,
    /// Provider options of the level the file belongs to
    pub options: IndexMap<String, Value>,
}

/// A template dropped because a variable it needs is unbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTemplate {
    pub template: String,
    pub variable: String,
}

/// Result of expanding one level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelExpansion {
    pub sources: Vec<DataSource>,
    pub skipped: Vec<SkippedTemplate>,
}

/// Expands hierarchy levels against a scope
pub struct HierarchyResolver;

impl HierarchyResolver {
    /// Ordered data sources for all levels
    pub fn expand(levels: &[HierarchyLevel], scope: &Scope) -> Vec<DataSource> {
        levels
            .iter()
            .flat_map(|level| Self::expand_level(level, scope).sources)
            .collect()
    }

    /// Data sources for a single level, with the templates that were skipped
    pub fn expand_level(level: &HierarchyLevel, scope: &Scope) -> LevelExpansion {
        let mut expansion = LevelExpansion::default();

        for template in &level.templates {
            let relative = match substitute(template, scope) {
                Ok(relative) => relative,
                Err(variable) => {
                    log::trace!(
                        "Skipping '{}' in level '{}': '{}' is not bound",
                        template.source,
                        level.name,
                        variable
                    );
                    expansion.skipped.push(SkippedTemplate {
                        template: template.source.clone(),
                        variable,
                    });
                    continue;
                }
            };

            let location = level.datadir.join(relative);
            match template.kind {
                TemplateKind::Path => expansion.sources.push(DataSource {
                    level_name: level.name.clone(),
                    location,
                    provider: level.provider,
                    options: level.options.clone(),
                }),
                TemplateKind::Glob => {
                    for matched in glob_matches(&location) {
                        expansion.sources.push(DataSource {
                            level_name: level.name.clone(),
                            location: matched,
                            provider: level.provider,
                            options: level.options.clone(),
                        });
                    }
                }
            }
        }

        expansion
    }
}

/// Fill a template from scope, or name the first unbound variable
fn substitute(template: &PathTemplate, scope: &Scope) -> std::result::Result<String, String> {
    let mut path = String::new();

    for segment in &template.segments {
        match segment {
            Segment::Text(text) => path.push_str(text),
            Segment::Token(token) => match token.method {
                InterpolationMethod::Literal => path.push_str(&token.argument),
                _ => match scope.get(&token.argument) {
                    Some(value) if !value.is_null() => {
                        path.push_str(&value.to_interpolated_string())
                    }
                    _ => return Err(token.argument.clone()),
                },
            },
        }
    }

    Ok(path)
}

fn glob_matches(pattern: &Path) -> Vec<PathBuf> {
    let pattern = pattern.to_string_lossy();
    let mut matches: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            log::warn!("Invalid glob pattern '{}': {}", pattern, e);
            Vec::new()
        }
    };
    matches.sort();
    matches
}
