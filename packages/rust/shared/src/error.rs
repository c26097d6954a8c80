//! Error types for docmark.
//!
//! Library crates use [`DocmarkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Malformed document content is never an error: the conversion pipeline
//! recovers and reports warnings instead. Errors are reserved for
//! configuration misuse and for sources that cannot be read at all.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all docmark operations.
#[derive(Debug, thiserror::Error)]
pub enum DocmarkError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error while writing output or reading config.
    #[error("I/O error at {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// A source document could not be read or opened.
    #[error("{}: {detail} ({kind})", path.display())]
    Source {
        kind: SourceErrorKind,
        path: PathBuf,
        detail: String,
    },

    /// An invariant rule identifier that the checker does not know.
    #[error("unknown invariant rule `{rule}` (known rules: {known})")]
    UnknownInvariant { rule: String, known: String },

    /// Data validation error (bad payload shape, invalid setting value).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON or TOML (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocmarkError>;

impl DocmarkError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a classified source error.
    pub fn source(kind: SourceErrorKind, path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Source {
            kind,
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Classify a raw I/O failure encountered while opening a source.
    pub fn source_io(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Self::source(SourceErrorKind::classify(err), path, err.to_string())
    }

    /// Message suitable for showing to an end user.
    ///
    /// Source errors map to their classified message; everything else falls
    /// back to the display form.
    pub fn user_message(&self) -> String {
        match self {
            Self::Source { kind, .. } => kind.user_message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Taxonomy of unreadable-source failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    NotFound,
    PermissionDenied,
    NotAFile,
    UnsupportedFormat,
    Corrupted,
    TooLarge,
    Unreadable,
}

impl SourceErrorKind {
    /// Map an OS-level error to the taxonomy.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Self::Corrupted,
            io::ErrorKind::OutOfMemory | io::ErrorKind::FileTooLarge => Self::TooLarge,
            io::ErrorKind::IsADirectory => Self::NotAFile,
            _ => Self::Unreadable,
        }
    }

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "FILE_NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotAFile => "NOT_A_FILE",
            Self::UnsupportedFormat => "INVALID_EXTENSION",
            Self::Corrupted => "CORRUPTED_FILE",
            Self::TooLarge => "FILE_TOO_LARGE",
            Self::Unreadable => "FILE_ACCESS_ERROR",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::NotFound => "File not found. Please check the file path.",
            Self::PermissionDenied => "Permission denied. Please check file permissions.",
            Self::NotAFile => "The selected path is not a file.",
            Self::UnsupportedFormat => "This file type is not supported.",
            Self::Corrupted => "The document appears to be corrupted or invalid.",
            Self::TooLarge => "The document is too large to convert.",
            Self::Unreadable => "The document could not be read.",
        }
    }
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
