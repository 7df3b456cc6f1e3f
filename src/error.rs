use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegChxrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input file {path}: {reason}")]
    Input { path: String, reason: String },

    #[error("Cannot verify registration for empty pacs data.")]
    EmptySeries,

    #[error("CUBE health check failed for {url}: {reason}")]
    HealthCheck { url: String, reason: String },

    #[error("CUBE returned HTTP {status} for {url}")]
    Cube { status: u16, url: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Unexpected CUBE response from {url}: {reason}")]
    Response { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegChxrError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Cube { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegChxrError>;
