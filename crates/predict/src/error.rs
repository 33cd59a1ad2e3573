use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by request-handling layers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before touching shared state.
    Malformed,
    /// A configured limit was hit.
    Capacity,
    /// Startup-only failures: bad config, unreadable or inconsistent state.
    Fatal,
}

impl PredictError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::QueryParse(_) => ErrorKind::Malformed,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::Io(_)
            | Self::Serialization(_)
            | Self::Integrity(_)
            | Self::InvalidConfig(_)
            | Self::ArtifactNotFound(_)
            | Self::Internal(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PredictError>;
