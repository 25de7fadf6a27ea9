//! Custom error types for paperbase

use thiserror::Error;

/// Main error type for paperbase operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("File too large: {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("File is empty")]
    EmptyFile,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Not initialized: run 'paperbase init' first")]
    NotInitialized,

    #[error("Already initialized; use --force to overwrite")]
    AlreadyInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation can plausibly succeed.
    ///
    /// Transient errors come from dependencies that may recover (network,
    /// database contention, index or embedding backends). Structural errors
    /// are properties of the input bytes; re-running them reproduces the
    /// failure, so jobs carrying them go terminal immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Index(_)
                | Error::Embedding(_)
                | Error::Generation(_)
                | Error::Io(_)
                | Error::Http(_)
                | Error::Storage(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Index(err.to_string())
    }
}

/// Result type alias for paperbase
pub type Result<T> = std::result::Result<T, Error>;
