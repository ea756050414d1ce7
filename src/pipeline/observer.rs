//! The observer: one entry point per inbound observation.
//!
//! Sequences the full pipeline with per-stage error isolation:
//! retrieval → zone → profile → intent → planning → sanitization →
//! gating → execution → reflection → skill recording → metrics.
//!
//! Every stage either degrades internally (retriever, intent engine,
//! planner, executor all return a usable default instead of failing) or
//! is guarded here (reflection falls back to an identity-only sync).
//! [`Observer::observe`] never returns an error; the report it produces
//! records what actually happened.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::identity::{self, sanitizer};
use crate::metrics::MetricsSink;
use crate::skills::{SkillAction, SkillGraph};
use crate::types::{
    Context, ExecutionResult, IdentityProfile, IdentityZone, IntentDecision, Observation, Plan,
    PlanSource,
};

use super::executor::Executor;
use super::gating;
use super::intent::IntentEngine;
use super::planner::Planner;
use super::reflector::Reflector;
use super::retriever::Retriever;

/// What one pipeline run produced, for callers and tests.
#[derive(Debug)]
pub struct PipelineReport {
    /// Zone the observation was processed in.
    pub zone: IdentityZone,
    /// The resolved intent decision.
    pub decision: IntentDecision,
    /// The plan as executed (post-sanitization, post-gating).
    pub plan: Plan,
    /// Per-step envelopes and the overall success flag.
    pub execution: ExecutionResult,
    /// Sanitizer corrections applied at the observer level.
    pub sanitizer_corrections: u32,
    /// Whether the full reflection write succeeded.
    pub reflected: bool,
}

/// Orchestrates the reasoning pipeline.
pub struct Observer {
    retriever: Retriever,
    intent: IntentEngine,
    planner: Planner,
    executor: Executor,
    reflector: Reflector,
    skills: Arc<SkillGraph>,
    metrics: Arc<dyn MetricsSink>,
}

impl Observer {
    /// Wire up an observer from its stages.
    pub fn new(
        retriever: Retriever,
        intent: IntentEngine,
        planner: Planner,
        executor: Executor,
        reflector: Reflector,
        skills: Arc<SkillGraph>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            retriever,
            intent,
            planner,
            executor,
            reflector,
            skills,
            metrics,
        }
    }

    /// Process one observation end to end.
    ///
    /// Exactly one call per inbound observation. Never fails.
    pub async fn observe(&self, observation: Observation) -> PipelineReport {
        let started = Instant::now();
        info!(
            observation = %observation.id,
            channel = %observation.channel_id,
            "pipeline start"
        );

        // Retrieval (degrades to an empty context internally).
        let context: Context = self.retriever.retrieve(&observation).await;

        // Identity (pure).
        let zone = identity::resolve_zone(&observation);
        let profile: IdentityProfile =
            identity::build_profile(&observation, context.user_entity.as_ref());

        // Intent (degrades to the NLP fallback internally).
        let decision = self.intent.resolve(&observation, &context).await;

        // Planning (always returns a plan).
        let mut plan = self
            .planner
            .plan(&observation, &context, &decision, zone, &profile)
            .await;

        // Observer-level sanitization, regardless of plan source.
        let sanitizer_corrections = sanitizer::sanitize_plan(zone, &mut plan, &profile);
        if sanitizer_corrections > 0 {
            warn!(
                corrections = sanitizer_corrections,
                observation = %observation.id,
                "observer sanitizer corrected the plan"
            );
        }

        // Gating enforcement.
        gating::apply(&mut plan, &decision, &observation.channel_id);

        // Execution sees the sanitized observation; reflection keeps the
        // original for a faithful audit trail.
        let sanitized_obs = sanitizer::sanitize_observation(zone, &observation, &profile);
        let execution = self.executor.execute(&plan, &sanitized_obs).await;

        // Reflection, with the identity-only fallback.
        let reflected = match self
            .reflector
            .reflect(&observation, &plan, &execution, &profile)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "reflection failed, attempting identity-only sync");
                if !super::reflector::plan_updated_identity(&plan) {
                    if let Err(e) = self.reflector.sync_identity(&profile).await {
                        warn!(error = %e, "identity-only sync failed too");
                    }
                }
                false
            }
        };

        // Skill-graph recording: only executed plans with real steps count,
        // and fallback apologies must not become skills.
        if !plan.steps.is_empty() && plan.source != PlanSource::Fallback {
            let intent_text = decision
                .intent
                .clone()
                .unwrap_or_else(|| observation.content.clone());
            let actions: Vec<SkillAction> = plan
                .steps
                .iter()
                .map(|step| SkillAction {
                    tool: step.tool.clone(),
                    input: serde_json::Value::Object(step.args.clone()),
                })
                .collect();
            let latency_ms = elapsed_ms(started);
            self.skills
                .record_execution(&intent_text, actions, execution.success, latency_ms)
                .await;
        }

        let total_ms = elapsed_ms(started);
        self.metrics
            .record_pipeline(&observation.id, total_ms, execution.success);
        info!(
            observation = %observation.id,
            ms = total_ms,
            success = execution.success,
            steps = plan.steps.len(),
            source = ?plan.source,
            "pipeline complete"
        );

        PipelineReport {
            zone,
            decision,
            plan,
            execution,
            sanitizer_corrections,
            reflected,
        }
    }
}

/// Elapsed wall-clock milliseconds since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
