//! Error types for the intake pipeline.
//!
//! Library crates use [`IntakeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::FieldViolation;

/// Top-level error type for all intake operations.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The caller's request was unusable before any work was attempted.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The model call exceeded its configured deadline.
    #[error("model invocation timed out after {timeout_ms}ms")]
    InvocationTimeout { timeout_ms: u64 },

    /// Transport-level model failure (connection, status, envelope).
    #[error("model invocation failed: {0}")]
    Invocation(String),

    /// Every attempt allowed by the retry policy failed.
    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<IntakeError>,
    },

    /// The payload did not conform to the declared schema.
    #[error("schema validation failed: {}", summarize(.violations))]
    SchemaValidation { violations: Vec<FieldViolation> },

    /// A staged record failed the basic shape check.
    #[error("malformed record at index {index}: {message}")]
    MalformedRecord { index: usize, message: String },

    /// A chunked write stopped part-way; earlier chunks stay committed.
    #[error(
        "staging write stopped after {chunks_completed} chunk(s) ({records_written} records committed): {source}"
    )]
    PartialWrite {
        chunks_completed: usize,
        records_written: usize,
        #[source]
        source: Box<IntakeError>,
    },

    /// The merge routine could not be invoked or failed inside the store.
    #[error("reconciliation via {routine} failed: {message}")]
    Reconciliation { routine: String, message: String },

    /// The caller cancelled the operation between attempts.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IntakeError>;

/// Whether a failure is the caller's fault or a dependency's.
///
/// Hosts map these to 4xx-style and 5xx-style responses respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The input failed validation.
    InvalidInput,
    /// A system or dependency failed.
    Dependency,
}

impl IntakeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-request error from any displayable message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error for the host boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRequest { .. }
            | Self::SchemaValidation { .. }
            | Self::MalformedRecord { .. } => ErrorClass::InvalidInput,
            Self::PartialWrite { source, .. }
                if matches!(**source, Self::MalformedRecord { .. }) =>
            {
                ErrorClass::InvalidInput
            }
            _ => ErrorClass::Dependency,
        }
    }

    /// Field violations carried by a schema failure, empty otherwise.
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            Self::SchemaValidation { violations } => violations,
            _ => &[],
        }
    }
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}
