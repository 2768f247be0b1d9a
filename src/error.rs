//! Error types for the mention pipeline.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Comment source error: {0}")]
    Source(#[from] SourceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Entity load error: {0}")]
    Load(#[from] LoadError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    /// A uniqueness constraint rejected the write. The rows already exist.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DatabaseError {
    /// Classify a libSQL error raised by a write.
    pub(crate) fn from_write(context: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed") {
            Self::Duplicate(format!("{context}: {message}"))
        } else if message.contains("constraint failed") {
            Self::Constraint(format!("{context}: {message}"))
        } else {
            Self::Query(format!("{context}: {message}"))
        }
    }
}

/// Errors from the upstream comment API.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Why a single envelope failed to publish.
///
/// Recorded per envelope in a `PublishReport`; never aborts a cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishFailure {
    #[error("rejected by transport: {0}")]
    Rejected(String),

    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("could not encode envelope: {0}")]
    Serialization(String),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),

    #[error("Comment fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The store refused the rows for a reason a retry cannot change.
    #[error("Facts rejected: {0}")]
    Unwritable(String),
}

impl PipelineError {
    /// Whether redelivering the same input could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Source(_))
    }
}

/// Errors from the CSV entity loader.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("CSV contains no entity rows")]
    EmptyCatalog,

    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
