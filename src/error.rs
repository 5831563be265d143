use thiserror::Error;

/// Error type for core retrieval-pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or malformed input (empty query, chunk without a file path).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Retrieval against a codebase that has never been indexed.
    #[error("codebase not indexed: {0}")]
    NotIndexed(String),

    /// Parser could not produce a usable tree. Handled locally by the
    /// chunker's character fallback; callers never see this variant.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// The cache database could not be opened. Handled locally; the
    /// cache degrades to a no-op.
    #[error("embedding cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Embedding provider, vector store, or reranker failure.
    #[error("external component error: {0}")]
    External(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an external-collaborator failure with the component name.
    pub fn external(component: &str, err: impl std::fmt::Display) -> Self {
        Error::External(format!("{component}: {err}"))
    }
}
