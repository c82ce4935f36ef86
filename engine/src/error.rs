//! Error types for the engine.
//!
//! The primary error type is `EngineError`, which represents run-level
//! errors that prevent a comparison or copy from starting (bad input paths,
//! destination type mismatches) or from completing at all. Per-item failures
//! are never an EngineError: they are reported as `Event::Error` or
//! `CopyEvent::Failed` and the walk continues with the item's siblings.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a run before any per-item work, or end it abnormally.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A root item does not exist
    #[error("Item not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    /// A root item exists but its metadata cannot be read
    #[error("Item not accessible: {}", .path.display())]
    SourceAccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The destination does not exist and neither does its parent
    #[error("Destination parent path not found: {}", .path.display())]
    DestinationParentNotFound { path: PathBuf },

    /// The destination (or its parent) exists but is not a directory
    #[error("Destination path exists and is not a directory: {}", .path.display())]
    DestinationNotDirectory { path: PathBuf },

    /// A destination item exists with the wrong kind for the source item
    #[error("Destination {} is a {found} where the source has a {expected}", .path.display())]
    DestinationTypeMismatch {
        path: PathBuf,
        found: &'static str,
        expected: &'static str,
    },

    /// Path cannot be used for this operation
    #[error("Invalid path: {} ({reason})", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// The background worker ended without reporting a status
    #[error("Worker thread panicked")]
    WorkerPanicked,

    /// Catch-all for unexpected I/O failures at run level
    #[error("I/O error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::SourceAccessDenied { source, .. } | Self::Io { source, .. } => {
                source.raw_os_error().map(|e| e as u32)
            }
            _ => None,
        }
    }

    /// Classify a failed root `symlink_metadata` lookup.
    pub(crate) fn from_root_lookup(path: PathBuf, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            EngineError::SourceNotFound { path }
        } else {
            EngineError::SourceAccessDenied { path, source: err }
        }
    }
}

/// Render a per-item I/O failure, keeping the OS error text.
pub(crate) fn describe_io(context: &str, err: &io::Error) -> String {
    format!("{}: {}", context, err)
}
