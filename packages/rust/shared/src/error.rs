//! Error types for schemalib.
//!
//! Library crates use [`SchemaLibError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Gateway failures get their own [`GatewayError`] so that stages can decide
//! per kind whether a failure is worth retrying.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all schemalib operations.
#[derive(Debug, thiserror::Error)]
pub enum SchemaLibError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A call through the external command gateway failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Cache read/write failure that a caller chose to surface.
    #[error("cache error: {0}")]
    Cache(String),

    /// JSON or describe-payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown seed, empty schema, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Embedding or vector sink failure during corpus upload.
    #[error("upload error: {0}")]
    Upload(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SchemaLibError>;

impl SchemaLibError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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
}

// ---------------------------------------------------------------------------
// Gateway errors
// ---------------------------------------------------------------------------

/// Failure of a single external command invocation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The command did not finish within its per-call timeout.
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    /// The platform kept reporting its request limit after every retry.
    #[error("rate limited by the platform after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// The command produced output that is not JSON, even after cleanup.
    #[error("malformed gateway output: {0}")]
    Malformed(String),

    /// The command exited unsuccessfully (or could not be started).
    #[error("gateway command exited with {code:?}: {stderr}")]
    NonZeroExit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// Discriminant of a [`GatewayError`], handy for logging and test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    Timeout,
    RateLimited,
    Malformed,
    NonZeroExit,
}

impl GatewayError {
    /// The kind of this failure.
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            Self::Timeout(_) => GatewayErrorKind::Timeout,
            Self::RateLimited { .. } => GatewayErrorKind::RateLimited,
            Self::Malformed(_) => GatewayErrorKind::Malformed,
            Self::NonZeroExit { .. } => GatewayErrorKind::NonZeroExit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SchemaLibError::config("missing gateway program");
        assert_eq!(err.to_string(), "config error: missing gateway program");

        let err = SchemaLibError::validation("seed 'Foo' not found");
        assert!(err.to_string().contains("seed 'Foo'"));
    }

    #[test]
    fn gateway_error_converts_and_keeps_kind() {
        let err: SchemaLibError = GatewayError::RateLimited { attempts: 3 }.into();
        match err {
            SchemaLibError::Gateway(inner) => {
                assert_eq!(inner.kind(), GatewayErrorKind::RateLimited);
                assert!(inner.to_string().contains("3 attempts"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
