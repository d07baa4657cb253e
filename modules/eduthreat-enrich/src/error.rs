use llm_client::LlmError;

/// Result type alias for enrichment operations.
pub type Result<T> = std::result::Result<T, EnrichError>;

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("Store error: {0}")]
    Store(#[from] eduthreat_store::StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl EnrichError {
    /// Rate-limit failures halt the consumer instead of being retried.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EnrichError::Llm(LlmError::RateLimited(_)))
    }
}
