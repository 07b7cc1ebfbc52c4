use thiserror::Error;

/// Main error type for ragent.
///
/// Locally-recoverable retrieval failures (a generated query that fails to
/// parse or execute) are NOT errors here; they are typed values on
/// `RetrievalResult` handled by the agent. This enum carries the failures
/// that genuinely propagate: store/model unavailability, configuration
/// problems, and invalid caller input.
#[derive(Error, Debug)]
pub enum RagentError {
    /// Graph store (SQLite) errors
    #[error("Store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding service errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Generative model service errors (unreachable, protocol failure)
    #[error("Model API error: {0}")]
    Model(String),

    /// Graph store unavailable (connection-level, not query-level)
    #[error("Store unavailable: {0}")]
    Store(String),

    /// Retrieval errors outside the generated-query path
    #[error("Search error: {0}")]
    Search(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using RagentError
pub type Result<T> = std::result::Result<T, RagentError>;

impl RagentError {
    /// True for the service-error class the caller may retry
    /// (store or model unreachable).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagentError::Model(_) | RagentError::Store(_) | RagentError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagentError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: RagentError = rusqlite_err.into();
        assert!(matches!(err, RagentError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RagentError = io_err.into();
        assert!(matches!(err, RagentError::Io(_)));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(RagentError::Model("down".to_string()).is_retryable());
        assert!(RagentError::Store("down".to_string()).is_retryable());
        assert!(!RagentError::InvalidInput("empty".to_string()).is_retryable());
        assert!(!RagentError::Config("bad".to_string()).is_retryable());
    }
}
