//! Claude messages-API client with schema-forced structured extraction.
//!
//! The single entry point is [`Claude::extract`]: build a request whose only
//! legal response is a tool call matching the caller's `schemars` schema,
//! retry transient failures with exponential backoff, and surface rate
//! limits as a distinct error kind so callers can halt instead of hammering
//! the API.

mod client;
mod error;
mod types;

pub use error::{LlmError, Result};

use std::time::Duration;

use rand::Rng;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use client::ClaudeClient;
use types::{ChatRequest, ToolDefinitionWire, WireMessage};

/// Max attempts for transient failures and malformed responses.
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff duration. Actual delay is base * 2^attempt + jitter.
const RETRY_BASE: Duration = Duration::from_secs(2);

const STRUCTURED_TOOL_NAME: &str = "structured_response";

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    /// Extract a `T` by forcing a tool call whose input schema is the
    /// `schemars` schema of `T`.
    ///
    /// Transient API failures and malformed payloads are retried up to
    /// [`MAX_ATTEMPTS`] with exponential backoff; [`LlmError::RateLimited`]
    /// is returned immediately so the caller can circuit-break.
    pub async fn extract<T>(&self, system_prompt: &str, user_prompt: &str) -> Result<T>
    where
        T: JsonSchema + DeserializeOwned,
    {
        let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
        let schema = serde_json::to_value(&schema)
            .map_err(|e| LlmError::InvalidResponse(format!("schema serialization: {e}")))?;

        let mut last_error = LlmError::InvalidResponse("no attempts made".to_string());

        for attempt in 0..MAX_ATTEMPTS {
            let mut request = ChatRequest::new(&self.model)
                .system(system_prompt)
                .message(WireMessage::user(user_prompt))
                .temperature(0.0)
                .tool(ToolDefinitionWire {
                    name: STRUCTURED_TOOL_NAME.to_string(),
                    description: "Report the extracted structured data.".to_string(),
                    input_schema: schema.clone(),
                });
            request.tool_choice = Some(serde_json::json!({
                "type": "tool",
                "name": STRUCTURED_TOOL_NAME,
            }));

            let result = match self.client().chat(&request).await {
                Ok(response) => match response.tool_input() {
                    Some(input) => serde_json::from_value::<T>(input.clone()).map_err(|e| {
                        LlmError::InvalidResponse(format!("payload deserialization: {e}"))
                    }),
                    None => Err(LlmError::InvalidResponse(
                        "no structured output in response".to_string(),
                    )),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => {
                    debug!(model = %self.model, attempt, "Structured extraction succeeded");
                    return Ok(value);
                }
                Err(e @ LlmError::RateLimited(_)) => return Err(e),
                Err(e) => {
                    let retriable = e.is_transient() || matches!(e, LlmError::InvalidResponse(_));
                    if retriable && attempt + 1 < MAX_ATTEMPTS {
                        let backoff = RETRY_BASE * 2u32.pow(attempt);
                        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                        warn!(
                            model = %self.model,
                            attempt = attempt + 1,
                            error = %e,
                            "Extraction attempt failed, retrying"
                        );
                        tokio::time::sleep(backoff + jitter).await;
                        last_error = e;
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_new_stores_model() {
        let ai = Claude::new("sk-ant-test", "claude-haiku-4-5-20251001");
        assert_eq!(ai.model(), "claude-haiku-4-5-20251001");
    }

    #[test]
    fn claude_with_base_url() {
        let ai = Claude::new("sk-ant-test", "m").with_base_url("https://custom.api.test");
        assert_eq!(ai.base_url.as_deref(), Some("https://custom.api.test"));
    }

    #[test]
    fn rate_limit_is_not_transient() {
        assert!(!LlmError::RateLimited("slow down".to_string()).is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [500u16, 502, 503, 529] {
            let e = LlmError::Api {
                status,
                message: String::new(),
            };
            assert!(e.is_transient(), "{status} should be transient");
        }
        let e = LlmError::Api {
            status: 400,
            message: String::new(),
        };
        assert!(!e.is_transient());
    }
}
