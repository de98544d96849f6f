//! Error types for architecture search

use thiserror::Error;

/// Result type alias for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Main error type for the search engine
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown primitive operation: {0}")]
    UnknownPrimitive(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Divergence during {stage}: non-finite value {value}")]
    Divergence { stage: String, value: f64 },

    #[error(
        "Sample space exhausted: requested {requested} unique architectures, \
         found {found} after {attempts} draws"
    )]
    SampleSpaceExhausted {
        requested: usize,
        found: usize,
        attempts: usize,
    },

    #[error("No candidate models produced")]
    NoCandidates,

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SearchError {
    /// Shorthand for a divergence raised at `stage`
    pub fn divergence(stage: impl Into<String>, value: f64) -> Self {
        SearchError::Divergence {
            stage: stage.into(),
            value,
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for SearchError {
    fn from(err: csv::Error) -> Self {
        SearchError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SearchError::divergence("parameter update", f64::NAN);
        assert!(err.to_string().contains("parameter update"));

        let err = SearchError::NoCandidates;
        assert_eq!(err.to_string(), "No candidate models produced");
    }

    #[test]
    fn test_exhaustion_message() {
        let err = SearchError::SampleSpaceExhausted {
            requested: 5,
            found: 2,
            attempts: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("requested 5"));
        assert!(msg.contains("found 2"));
    }
}
