//! Error types for strata
//!
//! Every failure carries a structured kind plus a context map so that the
//! CLI and the REST frontend can report it without re-parsing messages.

use std::fmt;

use indexmap::IndexMap;

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for strata operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Additional structured context (key, file, hierarchy entry, ...)
    pub context: IndexMap<String, String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// No value was found and no default was given
    #[error("key not found: {name}")]
    NotFound { name: String },
    /// A found value did not satisfy the asserted type
    #[error("value of type {actual} does not match declared type {expected}")]
    TypeMismatch { expected: String, actual: String },
    /// The same key was looked up again while resolving itself
    #[error("endless recursion detected while looking up '{key}'")]
    EndlessRecursion { key: String },
    /// The same expression was interpolated twice in one chain
    #[error("interpolation loop detected in expression '{expr}'")]
    InterpolationLoop { expr: String },
    /// An interpolation method that is not registered
    #[error("unknown interpolation method '{method}'")]
    UnknownInterpolationMethod { method: String },
    /// `alias(...)` used together with other content in the same string
    #[error("'alias' interpolation is only permitted when the expression is the entire string")]
    AliasNotAlone { expr: String },
    /// The first segment of a key cannot be an integer
    #[error("the first segment of key '{key}' must not be an integer")]
    FirstKeySegmentInt { key: String },
    /// A key contained an empty unquoted segment
    #[error("key '{key}' contains an empty segment")]
    EmptyKeySegment { key: String },
    /// A quoted key segment was never closed
    #[error("unterminated quote in key '{key}'")]
    UnterminatedQuote { key: String },
    /// A variable file whose top level is not a mapping
    #[error("file '{path}' does not contain a mapping at the top level")]
    YamlNotHash { path: String },
    /// A provider was invoked without an option it requires
    #[error("missing required provider option '{option}'")]
    MissingRequiredOption { option: String },
    /// A hierarchy entry names a function that is not registered
    #[error("unknown {kind} function '{name}'")]
    UnknownFunction { kind: String, name: String },
    /// A merge strategy name that is not one of first/unique/hash/deep
    #[error("unknown merge strategy '{name}'")]
    UnknownMergeStrategy { name: String },
    /// The configuration document declares an unsupported version
    #[error("unsupported configuration version {version}, expected 5")]
    InvalidConfigVersion { version: i64 },
    /// Two hierarchy entries share a name
    #[error("hierarchy entry '{name}' is defined more than once")]
    DuplicateEntryName { name: String },
    /// A malformed configuration document
    #[error("invalid configuration: {detail}")]
    Config { detail: String },
    /// Error parsing YAML/JSON
    #[error("parse error: {detail}")]
    Parse { detail: String },
    /// I/O error other than a missing location
    #[error("i/o error: {detail}")]
    Io { detail: String },
    /// The caller-supplied cancellation token was triggered
    #[error("lookup cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Stable kebab-case name of this kind, used in structured reports
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NotFound { .. } => "not-found",
            ErrorKind::TypeMismatch { .. } => "type-mismatch",
            ErrorKind::EndlessRecursion { .. } => "endless-recursion",
            ErrorKind::InterpolationLoop { .. } => "interpolation-loop",
            ErrorKind::UnknownInterpolationMethod { .. } => "unknown-interpolation-method",
            ErrorKind::AliasNotAlone { .. } => "alias-not-alone",
            ErrorKind::FirstKeySegmentInt { .. } => "first-key-segment-int",
            ErrorKind::EmptyKeySegment { .. } => "empty-key-segment",
            ErrorKind::UnterminatedQuote { .. } => "unterminated-quote",
            ErrorKind::YamlNotHash { .. } => "yaml-not-hash",
            ErrorKind::MissingRequiredOption { .. } => "missing-required-option",
            ErrorKind::UnknownFunction { .. } => "unknown-function",
            ErrorKind::UnknownMergeStrategy { .. } => "unknown-merge-strategy",
            ErrorKind::InvalidConfigVersion { .. } => "invalid-config-version",
            ErrorKind::DuplicateEntryName { .. } => "duplicate-entry-name",
            ErrorKind::Config { .. } => "invalid-config",
            ErrorKind::Parse { .. } => "parse-error",
            ErrorKind::Io { .. } => "io-error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl Error {
    /// Create an error from a kind with empty context
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: IndexMap::new(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound { name: name.into() })
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    pub fn endless_recursion(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::EndlessRecursion { key: key.into() })
    }

    pub fn interpolation_loop(expr: impl Into<String>) -> Self {
        Self::new(ErrorKind::InterpolationLoop { expr: expr.into() })
    }

    pub fn unknown_interpolation_method(method: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownInterpolationMethod {
            method: method.into(),
        })
    }

    pub fn alias_not_alone(expr: impl Into<String>) -> Self {
        Self::new(ErrorKind::AliasNotAlone { expr: expr.into() })
    }

    pub fn missing_required_option(option: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingRequiredOption {
            option: option.into(),
        })
    }

    pub fn unknown_function(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownFunction {
            kind: kind.into(),
            name: name.into(),
        })
    }

    pub fn unknown_merge_strategy(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownMergeStrategy { name: name.into() })
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config {
            detail: detail.into(),
        })
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse {
            detail: detail.into(),
        })
    }

    pub fn io(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io {
            detail: detail.into(),
        })
    }

    /// Add a context entry to the error
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The stable kind name, e.g. "not-found"
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// True for errors the frontends report as caller mistakes (HTTP 400)
    pub fn is_reported(&self) -> bool {
        !matches!(self.kind, ErrorKind::Io { .. } | ErrorKind::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (k, v) in &self.context {
            write!(f, "\n  {}: {}", k, v)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(Error::not_found("a").kind_name(), "not-found");
        assert_eq!(
            Error::type_mismatch("String", "Integer").kind_name(),
            "type-mismatch"
        );
        assert_eq!(Error::endless_recursion("a").kind_name(), "endless-recursion");
        assert_eq!(
            Error::new(ErrorKind::InvalidConfigVersion { version: 3 }).kind_name(),
            "invalid-config-version"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::not_found("db.host").with_context("hierarchy", "Common");
        let display = format!("{}", err);

        assert!(display.contains("key not found: db.host"));
        assert!(display.contains("hierarchy: Common"));
    }

    #[test]
    fn test_reported_classification() {
        assert!(Error::not_found("x").is_reported());
        assert!(Error::parse("bad yaml").is_reported());
        assert!(!Error::io("disk on fire").is_reported());
        assert!(!Error::new(ErrorKind::Cancelled).is_reported());
    }
}
