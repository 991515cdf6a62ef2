use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    // Extraction safety errors
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    // Malformed compressed/zip streams
    #[error("failed to decode {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    // Disk errors, wrapped with the failing operation and path
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Network errors
    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiveError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ArchiveError::Decode {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Maps an `io::Error` to `ArchiveError::Io` with operation context.
pub(crate) fn io_ctx<'a>(
    op: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> ArchiveError + 'a {
    move |source| ArchiveError::io(op, path, source)
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
