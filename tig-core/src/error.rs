use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Integrity error: content stored as {expected} hashes to {actual}")]
    Integrity { expected: String, actual: String },

    #[error("No changes to commit")]
    NoChanges,

    #[error("IO error while {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Batch item {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification used by callers that translate errors into
/// user-facing status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Integrity,
    Internal,
}

impl Error {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Error::InvalidHash(_) | Error::InvalidPath(_) | Error::NoChanges => {
                ErrorKind::InvalidInput
            }
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::Batch { source, .. } => source.kind(),
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub(crate) trait IoResultExt<T> {
    fn with_path(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(op, path, e))
    }
}
