//! Error types for docforge.
//!
//! Library crates use [`DocForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every message starts with the taxonomy name, and errors raised inside the
//! pipeline are prefixed by the stage that raised them.

use std::path::PathBuf;

/// Top-level error type for all docforge operations.
#[derive(Debug, thiserror::Error)]
pub enum DocForgeError {
    /// The input document does not exist.
    #[error("InputNotFound: input document {path:?} does not exist")]
    InputNotFound { path: PathBuf },

    /// No ancestor of the starting directory contains the marker.
    #[error("RootNotFound: no ancestor of {start:?} contains '{marker}'")]
    RootNotFound { marker: String, start: PathBuf },

    /// A program needed by one of the steps is not installed.
    #[error("MissingDependency: '{program}' (needed by the {step} step) is not installed")]
    MissingDependency { program: String, step: String },

    /// Metadata extraction failed. Recoverable.
    #[error("[extract] ExtractionFailed: {reason}")]
    ExtractionFailed { reason: String },

    /// Document enhancement failed or produced no output.
    #[error("[enhance] EnhancementFailed: {reason}")]
    EnhancementFailed { reason: String },

    /// The compiler failed or the expected PDF is absent.
    #[error("[compile] CompilationFailed: {reason}")]
    CompilationFailed { reason: String },

    /// The compiled PDF could not be moved to the requested output path.
    #[error("[relocate] RelocationFailed: cannot move {from:?} to {to:?}: {source}")]
    RelocationFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// Dashboard requested but the project configuration file is missing.
    #[error("[dashboard] MissingProjectConfig: {path:?} does not exist")]
    MissingProjectConfig { path: PathBuf },

    /// The dashboard step failed.
    #[error("[dashboard] DashboardFailed: {reason}")]
    DashboardFailed { reason: String },

    /// The artifact could not be opened for preview. Non-fatal.
    #[error("[preview] PreviewUnavailable: {reason}")]
    PreviewUnavailable { reason: String },

    /// Settings loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A change-detection backend stopped working.
    #[error("watch error: {0}")]
    Watch(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocForgeError>;

impl DocForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Whether this error aborts the run. Extraction and preview failures
    /// are reported as warnings instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ExtractionFailed { .. } | Self::PreviewUnavailable { .. }
        )
    }
}
