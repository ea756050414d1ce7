//! Memory service client.
//!
//! The memory service is a black box over HTTP: key-value entities, hybrid
//! search, a skill store, and reflection upserts. This module exposes that
//! capability through the [`MemoryApi`] trait (so tests can fake it) and
//! one production implementation, [`MemoryClient`].
//!
//! Non-2xx responses surface as [`MemoryError`]; every pipeline stage that
//! consumes this client tolerates failure per its own degradation rule, so
//! nothing here retries or panics.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::skills::{Skill, SkillMatch, SkillStatus};
use crate::types::UserEntity;

/// Errors from the memory service.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Transport-level failure (connect, timeout).
    #[error("memory request failed: {0}")]
    Request(String),
    /// Service returned a non-2xx status.
    #[error("memory service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// Response body could not be decoded.
    #[error("memory response decode failed: {0}")]
    Decode(String),
}

/// One hybrid-search hit.
///
/// Scores are passed through exactly as returned, unclamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Stored text.
    #[serde(default)]
    pub content: String,
    /// Hybrid similarity score.
    #[serde(default)]
    pub score: f64,
    /// Stored timestamp, when the service kept one.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Scope of a persisted reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionScope {
    /// Tied to one user.
    User,
    /// Tied to one channel.
    Channel,
    /// Tied to one guild.
    Guild,
}

/// A reflection entry to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    /// Human-readable reflection text.
    pub text: String,
    /// Scope kind.
    pub scope: ReflectionScope,
    /// Id of the scoped object (channel, guild, or user id).
    pub scope_id: String,
    /// Structured metadata (type, timestamp, outcome).
    pub meta: serde_json::Value,
}

/// Capability surface the pipeline consumes from the memory service.
#[async_trait]
pub trait MemoryApi: Send + Sync {
    /// Hybrid (keyword + vector) search over stored content.
    async fn hybrid_search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, MemoryError>;

    /// Fetch an entity by canonical id (`user:<author_id>`); `None` when absent.
    async fn get_user_entity(&self, entity_id: &str) -> Result<Option<UserEntity>, MemoryError>;

    /// Idempotently merge partial traits into an entity.
    async fn upsert_user_entity(
        &self,
        entity_id: &str,
        traits: &serde_json::Value,
    ) -> Result<(), MemoryError>;

    /// Search stored skills by intent similarity.
    async fn skill_search(&self, query: &str, limit: u32)
        -> Result<Vec<SkillMatch>, MemoryError>;

    /// Offer a skill body for persistence.
    async fn skill_promote(&self, skill: &Skill) -> Result<(), MemoryError>;

    /// Idempotently patch a skill's lifecycle status.
    async fn skill_set_status(
        &self,
        skill_id: &str,
        status: SkillStatus,
        reason: Option<&str>,
    ) -> Result<(), MemoryError>;

    /// List stored skills with stats (used by the decay sweep).
    async fn skill_list(&self) -> Result<Vec<SkillMatch>, MemoryError>;

    /// Persist a reflection entry.
    async fn reflect_upsert(&self, reflection: &Reflection) -> Result<(), MemoryError>;
}

/// HTTP client for the memory service.
pub struct MemoryClient {
    base_url: String,
    client: reqwest::Client,
}

/// Maximum response-body bytes kept in error messages.
const MAX_ERROR_BODY_BYTES: usize = 300;

impl MemoryClient {
    /// Create a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MemoryError> {
        url::Url::parse(base_url)
            .map_err(|e| MemoryError::Request(format!("invalid base URL {base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MemoryError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Read a response body, mapping non-2xx to [`MemoryError::Status`].
    async fn read_body(response: reqwest::Response) -> Result<String, MemoryError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MemoryError::Request(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(MemoryError::Status {
                status: status.as_u16(),
                body: truncate_body(&body, MAX_ERROR_BODY_BYTES),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl MemoryApi for MemoryClient {
    async fn hybrid_search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, MemoryError> {
        let response = self
            .client
            .post(self.url("/search/hybrid"))
            .json(&serde_json::json!({ "q": query, "limit": limit }))
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        let body = Self::read_body(response).await?;
        let parsed: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| MemoryError::Decode(e.to_string()))?;

        // The service answers with either `items` or `results`.
        let hits = parsed
            .get("items")
            .or_else(|| parsed.get("results"))
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));

        serde_json::from_value(hits).map_err(|e| MemoryError::Decode(e.to_string()))
    }

    async fn get_user_entity(&self, entity_id: &str) -> Result<Option<UserEntity>, MemoryError> {
        let response = self
            .client
            .get(self.url(&format!("/entities/{entity_id}")))
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        let body = Self::read_body(response).await?;
        let entity: UserEntity =
            serde_json::from_str(&body).map_err(|e| MemoryError::Decode(e.to_string()))?;
        Ok(Some(entity))
    }

    async fn upsert_user_entity(
        &self,
        entity_id: &str,
        traits: &serde_json::Value,
    ) -> Result<(), MemoryError> {
        debug!(entity = entity_id, "upserting user entity traits");
        let response = self
            .client
            .post(self.url(&format!("/entities/{entity_id}")))
            .json(&serde_json::json!({ "id": entity_id, "traits": traits }))
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        Self::read_body(response).await.map(|_| ())
    }

    async fn skill_search(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SkillMatch>, MemoryError> {
        let response = self
            .client
            .post(self.url("/skills/search"))
            .json(&serde_json::json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| MemoryError::Decode(e.to_string()))
    }

    async fn skill_promote(&self, skill: &Skill) -> Result<(), MemoryError> {
        let response = self
            .client
            .post(self.url("/skills/promote"))
            .json(&serde_json::json!({ "skill": skill }))
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        Self::read_body(response).await.map(|_| ())
    }

    async fn skill_set_status(
        &self,
        skill_id: &str,
        status: SkillStatus,
        reason: Option<&str>,
    ) -> Result<(), MemoryError> {
        let mut payload = serde_json::json!({ "status": status });
        if let Some(reason) = reason {
            payload["reason"] = serde_json::Value::String(reason.to_owned());
        }

        let response = self
            .client
            .patch(self.url(&format!("/skills/{skill_id}/status")))
            .json(&payload)
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        Self::read_body(response).await.map(|_| ())
    }

    async fn skill_list(&self) -> Result<Vec<SkillMatch>, MemoryError> {
        let response = self
            .client
            .get(self.url("/skills"))
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| MemoryError::Decode(e.to_string()))
    }

    async fn reflect_upsert(&self, reflection: &Reflection) -> Result<(), MemoryError> {
        let response = self
            .client
            .post(self.url("/reflections"))
            .json(reflection)
            .send()
            .await
            .map_err(|e| MemoryError::Request(e.to_string()))?;

        Self::read_body(response).await.map(|_| ())
    }
}

/// Canonical entity id for an observation author.
pub fn canonical_user_id(author_id: &str) -> String {
    format!("user:{author_id}")
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
