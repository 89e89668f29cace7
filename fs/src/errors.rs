use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

/// Errors returned by the node store, the inode engine and the space
/// filesystem.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("invalid parent: {0}")]
    InvalidParent(Uuid),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal storage error: {0}")]
    StorageError(String),
}

impl Error {
    /// Whether the error signals a missing node, path or parent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::InvalidParent(_))
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(value: redb::Error) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(value: redb::DatabaseError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(value: redb::TableError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(value: redb::TransactionError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(value: redb::StorageError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(value: redb::CommitError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::InvalidInput => Error::Invalid(value.to_string()),
            std::io::ErrorKind::NotFound => Error::NotFound(value.to_string()),
            std::io::ErrorKind::Unsupported => Error::Unsupported(value.to_string()),
            _ => Error::StorageError(value.to_string()),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        let kind = match value {
            Error::NotFound(_) | Error::InvalidParent(_) => std::io::ErrorKind::NotFound,
            Error::AlreadyExists(_) => std::io::ErrorKind::AlreadyExists,
            Error::Invalid(_) | Error::NotADirectory(_) | Error::IsADirectory(_) => {
                std::io::ErrorKind::InvalidInput
            }
            Error::Unsupported(_) => std::io::ErrorKind::Unsupported,
            Error::StorageError(_) => std::io::ErrorKind::Other,
        };
        Self::new(kind, value.to_string())
    }
}
