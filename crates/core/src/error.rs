use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Transition(#[from] crate::orchestrator::TransitionError),
}

/// Coarse error category reported to callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Extraction,
    Dependency,
    NotFound,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Url(_) | Self::Transition(_) => ErrorKind::Configuration,
            Self::Extraction(_) | Self::Io(_) => ErrorKind::Extraction,
            Self::Dependency(_) | Self::Http(_) | Self::Serialization(_) => ErrorKind::Dependency,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn dependency(backend: &str, details: impl std::fmt::Display) -> Self {
        Self::Dependency(format!("{backend}: {details}"))
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
