use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("short code already exists: {0}")]
    KeyExists(String),
    #[error("short code not found: {0}")]
    KeyNotFound(String),
    #[error("link has been deleted: {0}")]
    Deleted(String),
    #[error("persistence log i/o failed: {0}")]
    Io(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
    #[error("invalid short code length {length}; expected 1..={max}")]
    InvalidLength { length: usize, max: usize },
}

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("batch of {len} items exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("delete dispatcher is shutting down")]
    ShuttingDown,
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ShortenerError {
    /// The short code never existed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::KeyNotFound(_)))
    }

    /// The short code existed but its link was deleted by the owner.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Deleted(_)))
    }
}
