use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    // Graph validation errors (fatal, pre-stream)
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    // Provider / credentials errors (fatal, pre-stream)
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Provider errors (recoverable at agent level)
    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    // LLM output that failed to parse into the expected shape
    #[error("Response parse error: {0}")]
    Parse(String),

    // Agent errors
    #[error("Agent failed: {agent}: {message}")]
    FatalAgent { agent: String, message: String },

    // Run lifecycle
    #[error("Run cancelled")]
    Cancelled,

    // Embedding store errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Anything else fatal mid-stream
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrellisError {
    /// Recoverable errors are surfaced in step metadata; the run continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::RateLimited(_) | Self::Parse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;
