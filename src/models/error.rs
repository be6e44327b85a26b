use thiserror::Error;

/// Failures reported by the search backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection to searchd failed: {0}")]
    Connect(String),

    /// A batch failed as a whole, or a sub-query came back with a
    /// non-empty error string.
    #[error("query failed: {0}")]
    Query(String),
}

/// Failures in the cache layer. Never fatal to a search call: readers
/// treat them as a miss, writers as a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store: {0}")]
    Store(String),

    #[error("cache payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
