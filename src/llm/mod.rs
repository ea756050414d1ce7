//! Language-model provider abstraction.
//!
//! The planner talks to a chat-completion endpoint through the
//! [`LlmProvider`] trait so tests can substitute deterministic
//! responses. The single production implementation,
//! [`HttpLlmProvider`], speaks the OpenAI-style `/chat/completions`
//! wire format. The response body is treated as opaque text; all plan
//! parsing and recovery happens in the planner.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

/// Errors from a language-model call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("llm request failed: {0}")]
    Request(String),
    /// Endpoint returned a non-2xx status.
    #[error("llm returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body for diagnostics.
        body: String,
    },
    /// Response body did not contain a completion.
    #[error("llm response missing completion text")]
    EmptyCompletion,
}

/// A chat-completion capability.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion with a system and a user prompt, returning the
    /// raw assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// HTTP chat-completion provider.
pub struct HttpLlmProvider {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

/// Maximum response-body bytes kept in error messages.
const MAX_ERROR_BODY_BYTES: usize = 500;

impl HttpLlmProvider {
    /// Create a provider for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        url::Url::parse(base_url)
            .map_err(|e| LlmError::Request(format!("invalid base URL {base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model.to_owned(),
            api_key: api_key.to_owned(),
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "stream": false,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| LlmError::Request(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate_body(&payload, MAX_ERROR_BODY_BYTES),
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|e| LlmError::Request(format!("invalid JSON from llm endpoint: {e}")))?;

        let text = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or(LlmError::EmptyCompletion)?;

        Ok(text.to_owned())
    }
}

/// Truncate a string to a byte limit on a char boundary.
fn truncate_body(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !body.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    body.get(..end).unwrap_or_default().to_owned()
}
