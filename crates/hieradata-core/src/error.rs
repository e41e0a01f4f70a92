//! Error types for hieradata
//!
//! Every failure carries a kind, the lookup key being resolved, the file
//! involved (if any), and an actionable help message. `NotFound` is the
//! ordinary "miss" outcome; every other kind is a malfunction.

use std::fmt;
use std::path::{Path, PathBuf};

/// Result type alias for hieradata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hieradata operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Lookup key being resolved when the error occurred (e.g., "ntp::servers")
    pub key: Option<String>,
    /// Data or hierarchy file involved, if any
    pub location: Option<PathBuf>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid hierarchy declaration, merge options or type expression
    Config,
    /// A data file could not be decoded
    Parse { location: String },
    /// Interpolation revisited a key that is still being resolved
    RecursiveLookup { chain: Vec<String> },
    /// Malformed or misplaced interpolation expression
    Interpolation,
    /// Found values cannot be combined with the requested strategy
    MergeType,
    /// Found or default value does not match the expected type
    TypeMismatch,
    /// No value found and no default supplied
    NotFound { names: Vec<String> },
    /// Lookup key is empty or malformed
    InvalidKey,
    /// A file exists but could not be read
    Io,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            key: None,
            location: None,
            help: None,
            cause: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Config);
        err.cause = Some(message.into());
        err
    }

    /// Create the error raised when deep-only merge options are combined
    /// with another strategy
    pub fn deep_options_without_deep(strategy: &str) -> Self {
        Self::config(format!(
            "The options knockout_prefix, sort_merged_arrays, merge_hash_arrays, and unpack_arrays are only available with the 'deep' merge strategy (got '{}')",
            strategy
        ))
        .with_help("Select the 'deep' merge strategy or remove the deep merge options")
    }

    /// Create a parse error for a data or hierarchy file
    pub fn parse(location: impl AsRef<Path>, message: impl Into<String>) -> Self {
        let location = location.as_ref();
        let mut err = Self::new(ErrorKind::Parse {
            location: location.display().to_string(),
        });
        err.location = Some(location.to_path_buf());
        err.cause = Some(message.into());
        err.help = Some("Fix the syntax of the file; the next lookup will parse it again".into());
        err
    }

    /// Create a recursive lookup error reporting the interpolation stack
    pub fn recursive_lookup(chain: Vec<String>) -> Self {
        let mut err = Self::new(ErrorKind::RecursiveLookup { chain });
        err.help = Some("Break the cycle by removing one of the interpolations".into());
        err
    }

    /// Create an interpolation syntax error
    pub fn interpolation(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Interpolation);
        err.cause = Some(message.into());
        err
    }

    /// Create the error for an `alias` token that shares its string with other text
    pub fn alias_not_entire_string() -> Self {
        Self::interpolation(
            "'alias' interpolation is only permitted if the expression is equal to the entire string",
        )
        .with_help("Use 'lookup' or 'hiera' to splice a value into surrounding text")
    }

    /// Create a merge type error
    pub fn merge_type(strategy: &str, got: &str) -> Self {
        let mut err = Self::new(ErrorKind::MergeType);
        err.cause = Some(format!(
            "'{}' merge cannot combine a value of type {}",
            strategy, got
        ));
        err.help = Some(match strategy {
            "unique" => "Every contributing value must be a sequence or a scalar".to_string(),
            _ => "Every contributing value must be a mapping".to_string(),
        });
        err
    }

    /// Create a type mismatch error
    pub fn type_mismatch(what: &str, expected: impl fmt::Display, got: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::TypeMismatch);
        err.cause = Some(format!(
            "{} has wrong type, expects {}, got {}",
            what,
            expected,
            got.into()
        ));
        err
    }

    /// Create a not found error for one or more names
    pub fn not_found(names: Vec<String>) -> Self {
        let mut err = Self::new(ErrorKind::NotFound { names });
        err.help = Some("Add the key to a data file in the hierarchy or supply a default".into());
        err
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::InvalidKey);
        err.key = Some(key.into());
        err.cause = Some(message.into());
        err
    }

    /// Create an I/O error for a file that exists but cannot be read
    pub fn io(location: impl AsRef<Path>, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Io);
        err.location = Some(location.as_ref().to_path_buf());
        err.cause = Some(message.into());
        err
    }

    /// Add key context to the error, keeping the innermost key if one is set
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        if self.key.is_none() {
            self.key = Some(key.into());
        }
        self
    }

    /// Add file location to the error
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// True for the ordinary "no value" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cause_written = false;

        // Main error message
        match &self.kind {
            ErrorKind::Config => write!(f, "Configuration error")?,
            ErrorKind::Parse { location } => {
                write!(f, "Unable to parse ({})", location)?;
                if let Some(cause) = &self.cause {
                    write!(f, ": {}", cause)?;
                    cause_written = true;
                }
            }
            ErrorKind::RecursiveLookup { chain } => {
                write!(f, "Recursive lookup detected in [{}]", chain.join(", "))?
            }
            ErrorKind::Interpolation => write!(f, "Interpolation error")?,
            ErrorKind::MergeType => write!(f, "Merge type error")?,
            ErrorKind::TypeMismatch => write!(f, "Type mismatch")?,
            ErrorKind::NotFound { names } => match names.as_slice() {
                [name] => write!(f, "did not find a value for the name '{}'", name)?,
                _ => write!(
                    f,
                    "did not find a value for any of the names [{}]",
                    names
                        .iter()
                        .map(|n| format!("'{}'", n))
                        .collect::<Vec<_>>()
                        .join(", ")
                )?,
            },
            ErrorKind::InvalidKey => write!(f, "Invalid lookup key")?,
            ErrorKind::Io => write!(f, "I/O error")?,
        }

        if let Some(key) = &self.key {
            write!(f, "\n  Key: {}", key)?;
        }

        // Parse errors already name their file in the headline
        if let (Some(location), false) = (
            &self.location,
            matches!(self.kind, ErrorKind::Parse { .. }),
        ) {
            write!(f, "\n  File: {}", location.display())?;
        }

        if let (Some(cause), false) = (&self.cause, cause_written) {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}
