use thiserror::Error;

/// Configuration-class failures. Everything else in the pipeline is
/// recovered locally (empty context, confidence = false).
#[derive(Error, Debug)]
pub enum SupportError {
    #[error("Router '{0}' has no candidate routes")]
    EmptyRoutes(&'static str),

    #[error("Centroid for route '{route}' has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        route: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Backing store error: {0}")]
    Store(String),

    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<lancedb::Error> for SupportError {
    fn from(e: lancedb::Error) -> Self {
        SupportError::Store(e.to_string())
    }
}

pub type SupportResult<T> = std::result::Result<T, SupportError>;
