//! Error types for the ingestion producer

use thiserror::Error;

/// Longest API error body kept in an [`IngestError::Api`].
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YouTube API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed {endpoint} response: {message}")]
    MalformedResponse { endpoint: String, message: String },
}

impl IngestError {
    /// Build an API error, truncating long bodies
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        Self::Api { status, body }
    }

    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Quota and key problems will not clear up by moving to the next bucket
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::Api { status: 403, body } if body.contains("quotaExceeded"))
    }
}
