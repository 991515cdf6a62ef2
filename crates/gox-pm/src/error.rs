use gox_archive::ArchiveError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackageError {
    // Parse-time errors, before any I/O
    #[error("invalid package source: {0}")]
    InvalidSource(String),

    // Post-download validation: the archive carried no usable payload
    #[error("{package}: missing include/ and lib/")]
    MissingPayload { package: String },

    // Per-package wrapper carrying the offending source string
    #[error("{package}: {source}")]
    Fetch {
        package: String,
        #[source]
        source: Box<PackageError>,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;
