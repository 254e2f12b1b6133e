//! Error types shared across the harvest crates

use thiserror::Error;

/// Result type alias for shared harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Main error type for shared harvest code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarvestError {
    #[error("Unknown job status: '{0}'. Expected one of pending, cooking, failed, completed")]
    InvalidStatus(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl HarvestError {
    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}
