//! Context retrieval.
//!
//! Builds the bounded [`Context`] for one observation: hybrid-search
//! results, a recent slice, and the author's entity. Retrieval is a
//! best-effort stage; any failure yields a pass-through context with
//! empty collections and is logged, never propagated.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::memory::{canonical_user_id, MemoryApi};
use crate::types::{Context, Observation, RecentSnippet, RelevantSnippet};

/// Hybrid-search result budget per observation.
const SEARCH_LIMIT: u32 = 10;

/// Recent-snippet budget per observation.
const RECENT_LIMIT: usize = 5;

/// Builds retrieval contexts from the memory service.
pub struct Retriever {
    memory: Arc<dyn MemoryApi>,
}

impl Retriever {
    /// Create a retriever over the given memory client.
    pub fn new(memory: Arc<dyn MemoryApi>) -> Self {
        Self { memory }
    }

    /// Build the context for one observation.
    ///
    /// Search scores are preserved exactly as returned (no clamping).
    /// Missing timestamps on recent snippets are filled with "now" so
    /// downstream consumers always see an ISO timestamp.
    pub async fn retrieve(&self, observation: &Observation) -> Context {
        let mut context = Context::default();

        match self
            .memory
            .hybrid_search(&observation.content, SEARCH_LIMIT)
            .await
        {
            Ok(hits) => {
                context.relevant = hits
                    .iter()
                    .map(|h| RelevantSnippet {
                        content: h.content.clone(),
                        score: h.score,
                    })
                    .collect();

                context.recent = hits
                    .iter()
                    .take(RECENT_LIMIT)
                    .map(|h| RecentSnippet {
                        content: h.content.clone(),
                        timestamp: h
                            .timestamp
                            .clone()
                            .unwrap_or_else(|| Utc::now().to_rfc3339()),
                    })
                    .collect();
            }
            Err(e) => {
                warn!(error = %e, observation = %observation.id, "hybrid search failed");
            }
        }

        let entity_id = canonical_user_id(&observation.author_id);
        match self.memory.get_user_entity(&entity_id).await {
            Ok(entity) => context.user_entity = entity,
            Err(e) => {
                warn!(error = %e, entity = %entity_id, "entity fetch failed");
            }
        }

        debug!(
            observation = %observation.id,
            relevant = context.relevant.len(),
            recent = context.recent.len(),
            has_entity = context.user_entity.is_some(),
            "context built"
        );
        context
    }
}
