//! Reflection: persisting what happened back into memory.
//!
//! After execution the reflector writes one reflection entry (the
//! observation, the plan, and the outcome summary) and syncs the
//! author's identity traits so preference updates survive restarts.
//! Both writes are best-effort; the observer falls back to an
//! identity-only sync when full reflection fails.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::memory::{canonical_user_id, MemoryApi, MemoryError, Reflection, ReflectionScope};
use crate::types::{ExecutionResult, IdentityProfile, Observation, Plan};

/// Persists reflections and identity traits.
pub struct Reflector {
    memory: Arc<dyn MemoryApi>,
}

impl Reflector {
    /// Create a reflector over the given memory client.
    pub fn new(memory: Arc<dyn MemoryApi>) -> Self {
        Self { memory }
    }

    /// Persist the full reflection and sync identity traits.
    ///
    /// Scope preference: channel, then guild, then user. The reflection
    /// text carries the *original* observation so the audit trail stays
    /// faithful even when the executor saw a sanitized copy.
    ///
    /// # Errors
    ///
    /// Returns the first memory failure; the caller decides the fallback.
    pub async fn reflect(
        &self,
        observation: &Observation,
        plan: &Plan,
        result: &ExecutionResult,
        profile: &IdentityProfile,
    ) -> Result<(), MemoryError> {
        let (scope, scope_id) = resolve_scope(observation);

        let outcome = if result.success {
            "success".to_owned()
        } else {
            let failed: Vec<&str> = result
                .outputs
                .iter()
                .filter(|o| !o.envelope.ok)
                .map(|o| o.envelope.tool.as_str())
                .collect();
            format!("failed at {failed:?}")
        };

        let text = format!(
            "observation: {}\nplan: {}\noutcome: {outcome}",
            observation.content, plan.reasoning
        );

        let reflection = Reflection {
            text,
            scope,
            scope_id,
            meta: json!({
                "type": "system-reflection",
                "timestamp": Utc::now().to_rfc3339(),
                "observationId": observation.id,
                "planSource": plan.source,
                "steps": plan.steps.len(),
                "success": result.success,
            }),
        };

        self.memory.reflect_upsert(&reflection).await?;
        debug!(observation = %observation.id, "reflection persisted");

        // An identity.update step already wrote the authoritative traits;
        // re-syncing the stale pre-execution profile would clobber them.
        if plan_updated_identity(plan) {
            return Ok(());
        }
        self.sync_identity(profile).await
    }

    /// Sync only the identity traits (the observer's secondary fallback).
    ///
    /// # Errors
    ///
    /// Returns the memory failure; the observer logs and moves on.
    pub async fn sync_identity(&self, profile: &IdentityProfile) -> Result<(), MemoryError> {
        let traits = json!({
            "identity": {
                "publicAliases": profile.public_aliases,
                "privateAliases": profile.private_aliases,
                "allowAutoIntimate": profile.allow_auto_intimate,
            }
        });

        let entity_id = canonical_user_id(&profile.user_id);
        match self.memory.upsert_user_entity(&entity_id, &traits).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(entity = %entity_id, error = %e, "identity sync failed");
                Err(e)
            }
        }
    }
}

/// True when the plan carried its own identity write.
pub fn plan_updated_identity(plan: &Plan) -> bool {
    plan.steps.iter().any(|s| s.tool == "identity.update")
}

/// Scope preference: channel, then guild, then user.
fn resolve_scope(observation: &Observation) -> (ReflectionScope, String) {
    if !observation.channel_id.is_empty() {
        (ReflectionScope::Channel, observation.channel_id.clone())
    } else if let Some(guild_id) = &observation.guild_id {
        (ReflectionScope::Guild, guild_id.clone())
    } else {
        (ReflectionScope::User, observation.author_id.clone())
    }
}
