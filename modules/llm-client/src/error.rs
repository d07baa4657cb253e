/// Result type alias for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The provider rejected the request for rate-limit reasons (HTTP 429).
    /// Callers treat this as a circuit-break signal, not a retriable error.
    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    /// Non-success response that is not a rate limit and not transient.
    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response arrived but did not contain a usable structured payload.
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LlmError {
    /// Transient failures are retried with backoff inside the client.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => matches!(status, 500 | 502 | 503 | 529),
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
