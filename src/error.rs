//! Crate-wide error type.
//!
//! Component errors (filter parsing, vector storage, pattern discovery,
//! embedding) each carry their own enum; [`EngineError`] is the umbrella the
//! engine surface returns, with stable status codes for hosts that report
//! errors programmatically.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::filter::FilterError;
use crate::pattern::PatternError;
use crate::record::store::RecordStoreError;
use crate::vector::VectorError;

/// Umbrella error for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Record storage failed: {0}")]
    RecordStore(#[from] RecordStoreError),

    #[error("Invalid configuration: {reason}\nSuggestion: Check the settings file and ANIMA_ environment overrides")]
    Config { reason: String },
}

impl EngineError {
    /// Stable status code for JSON error reporting.
    pub fn status_code(&self) -> String {
        match self {
            Self::Filter(e) => e.status_code().to_string(),
            Self::Vector(_) => "VECTOR_ERROR".to_string(),
            Self::Pattern(PatternError::NotFound { .. }) => "PATTERN_NOT_FOUND".to_string(),
            Self::Pattern(_) => "PATTERN_ERROR".to_string(),
            Self::Embedding(_) => "EMBEDDING_ERROR".to_string(),
            Self::RecordStore(RecordStoreError::NotFound(_)) => "RECORD_NOT_FOUND".to_string(),
            Self::RecordStore(_) => "RECORD_STORE_ERROR".to_string(),
            Self::Config { .. } => "CONFIG_ERROR".to_string(),
        }
    }

    /// Actionable recovery hints for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Vector(_) => vec![
                "Run integrity validation to find and drop invalid vectors",
                "Delete the vector snapshot to rebuild from records",
            ],
            Self::Pattern(_) => vec![
                "Force a pattern refresh to rebuild the cache",
                "Check disk space in the data directory",
            ],
            Self::Embedding(_) => vec![
                "Check network access for the model download on first run",
                "Verify the model cache directory is writable",
            ],
            Self::RecordStore(RecordStoreError::NotFound(_)) => {
                vec!["Verify the record id; it may have been released"]
            }
            Self::Config { .. } => vec![
                "Validate the settings file syntax",
                "Unset conflicting ANIMA_ environment variables",
            ],
            _ => vec![],
        }
    }
}

/// Convenience alias used throughout the engine surface.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;

    #[test]
    fn test_status_codes_distinguish_not_found() {
        let err = EngineError::RecordStore(RecordStoreError::NotFound(RecordId::from("x")));
        assert_eq!(err.status_code(), "RECORD_NOT_FOUND");

        let err = EngineError::Pattern(PatternError::NotFound { id: "p".to_string() });
        assert_eq!(err.status_code(), "PATTERN_NOT_FOUND");
    }

    #[test]
    fn test_filter_errors_keep_their_own_codes() {
        let err = EngineError::Filter(FilterError::Empty);
        assert_eq!(err.status_code(), "EMPTY_FILTER");
    }
}
