//! Error types shared by the engine, extractors, storage and identity layers.

use thiserror::Error;

/// Result alias for index and search operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors raised below the service boundary.
///
/// `service::ServiceError` folds these into the three status classes that
/// query clients see.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Token missing, malformed, tampered with or expired.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Client-correctable query problem (syntax, foreign page token).
    #[error("bad query: {0}")]
    BadQuery(String),

    /// Index backend unreachable or misconfigured.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Listing spaces failed; a full reindex cannot start.
    #[error("space enumeration failed: {0}")]
    EnumerationFailed(String),

    /// One space failed to rebuild during a full reindex.
    #[error("indexing space {space} failed: {source}")]
    PerSpaceIndexFailed {
        space: String,
        #[source]
        source: Box<SearchError>,
    },

    /// The item is not known to the index or to storage.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// The caller's context was cancelled or its deadline passed.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Stable machine-readable code, used in logs and CLI output.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::BadQuery(_) => "BAD_QUERY",
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            Self::EnumerationFailed(_) => "ENUMERATION_FAILED",
            Self::PerSpaceIndexFailed { .. } => "PER_SPACE_INDEX_FAILED",
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::Cancelled(_) => "CANCELLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix the request and try again.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::BadQuery(_) | Self::Unauthenticated(_))
    }

    /// Whether a higher layer may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EngineUnavailable(_) | Self::EnumerationFailed(_) | Self::Io(_)
        )
    }

    /// Wrap a per-space failure for the full reindex report.
    pub fn per_space(space: impl Into<String>, source: SearchError) -> Self {
        Self::PerSpaceIndexFailed {
            space: space.into(),
            source: Box::new(source),
        }
    }
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(e: tantivy::TantivyError) -> Self {
        match e {
            tantivy::TantivyError::IoError(io) => Self::EngineUnavailable(io.to_string()),
            tantivy::TantivyError::OpenDirectoryError(err) => {
                Self::EngineUnavailable(err.to_string())
            }
            tantivy::TantivyError::OpenReadError(err) => Self::EngineUnavailable(err.to_string()),
            tantivy::TantivyError::OpenWriteError(err) => Self::EngineUnavailable(err.to_string()),
            tantivy::TantivyError::LockFailure(err, _) => Self::EngineUnavailable(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<tantivy::query::QueryParserError> for SearchError {
    fn from(e: tantivy::query::QueryParserError) -> Self {
        Self::BadQuery(e.to_string())
    }
}
