//! Planning: observation + context + intent → an ordered [`Plan`].
//!
//! The cascade (first match wins):
//! 1. mock mode — deterministic canned plan, no model call
//! 2. ambient filter — inputs not addressed to the assistant plan nothing
//! 3. intent-map fast path — one deterministic tool step with defaults
//! 4. direct shortcuts — reflection, memory recall, recent recall
//! 5. identity preference update — deterministic two-step plan
//! 6. skill replay — synthesize the plan from a stored skill's actions
//! 7. language model — prompt with context, identity rules, and tone;
//!    parse with graded recovery, validate, and sanitize for public zones
//!
//! No failure escapes: the worst case is a single apologetic
//! `message.send` with `source = fallback`.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::emotion;
use crate::identity::sanitizer;
use crate::llm::LlmProvider;
use crate::memory::{canonical_user_id, MemoryApi};
use crate::tools::ToolDefinition;
use crate::types::{
    Context, IdentityProfile, IdentityZone, IntentDecision, Observation, Plan, PlanSource,
    PlanStep,
};

/// Largest plan the validator accepts.
const MAX_PLAN_STEPS: usize = 8;

/// Non-JSON model responses up to this length are treated as the reply itself.
const SHORT_TEXT_THRESHOLD: usize = 400;

/// Last-resort reply content.
const APOLOGY: &str = "Sorry, I couldn't work out how to help with that. Could you rephrase?";

/// Clarification injected when the model plans zero steps.
const CLARIFICATION: &str = "Could you clarify what you'd like me to do?";

/// Produces plans for the observer.
pub struct Planner {
    llm: Arc<dyn LlmProvider>,
    memory: Arc<dyn MemoryApi>,
    tools: Vec<ToolDefinition>,
    config: AgentConfig,
}

impl Planner {
    /// Create a planner.
    ///
    /// `tools` is the registry's definition list, serialized into the
    /// model prompt.
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        memory: Arc<dyn MemoryApi>,
        tools: Vec<ToolDefinition>,
        config: AgentConfig,
    ) -> Self {
        Self {
            llm,
            memory,
            tools,
            config,
        }
    }

    /// Run the cascade. Never fails; always returns a plan.
    pub async fn plan(
        &self,
        observation: &Observation,
        context: &Context,
        decision: &IntentDecision,
        zone: IdentityZone,
        profile: &IdentityProfile,
    ) -> Plan {
        // 1. Mock mode.
        if self.config.mock_planner {
            return Plan::single_message(
                &observation.channel_id,
                "Acknowledged.",
                "mock reply",
                "mock planner is enabled",
                PlanSource::Fallback,
            );
        }

        // 2. Ambient filter: guild chatter that never addresses the
        // assistant plans nothing. Direct messages are always addressed.
        if zone.is_public()
            && self.config.require_address
            && !self.is_addressed(&observation.content)
        {
            debug!(observation = %observation.id, "not addressed, planning nothing");
            return Plan {
                steps: Vec::new(),
                reasoning: "not addressed".to_owned(),
                confidence: None,
                source: PlanSource::Fallback,
            };
        }

        // 3. Intent-map fast path.
        if decision.source == "intent-map" {
            if let Some(intent) = decision.intent.as_deref() {
                return self.intent_map_plan(intent, observation);
            }
        }

        // 4. Direct shortcuts.
        if let Some(plan) = self.shortcut_plan(observation) {
            return plan;
        }

        // 5. Identity preference update.
        if let Some(plan) = self.identity_preference_plan(observation, zone) {
            return plan;
        }

        // 6. Skill replay.
        if let Some(skill_match) = &decision.skill_match {
            info!(
                skill = skill_match.skill.id.as_deref().unwrap_or("<unsaved>"),
                similarity = skill_match.similarity,
                "replaying skill"
            );
            let steps = skill_match
                .skill
                .actions
                .iter()
                .map(|action| PlanStep {
                    tool: action.tool.clone(),
                    args: action
                        .input
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    reason: format!("replayed from skill '{}'", skill_match.skill.intent),
                    confidence: Some(skill_match.similarity),
                })
                .collect();
            return Plan {
                steps,
                reasoning: format!(
                    "replayed stored skill for intent '{}'",
                    skill_match.skill.intent
                ),
                confidence: Some(skill_match.similarity),
                source: PlanSource::SkillGraph,
            };
        }

        // 7. Ensure the entity is on hand for prompt assembly.
        let fetched_entity;
        let entity = match &context.user_entity {
            Some(e) => Some(e),
            None => {
                fetched_entity = self
                    .memory
                    .get_user_entity(&canonical_user_id(&observation.author_id))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "entity fetch for prompt failed");
                        None
                    });
                fetched_entity.as_ref()
            }
        };

        // 8-10. Prompt, model call, recovery.
        let system = self.system_prompt(zone, profile);
        let user = self.user_prompt(observation, context, entity);

        let mut plan = match self.llm.complete(&system, &user).await {
            Ok(response) => parse_llm_plan(&response, &observation.channel_id),
            Err(e) => {
                warn!(error = %e, "language model call failed");
                Plan::single_message(
                    &observation.channel_id,
                    APOLOGY,
                    "apologize",
                    &format!("LLM planning failed: {e}"),
                    PlanSource::Fallback,
                )
            }
        };

        // Re-validate whatever came back.
        if let Err(e) = validate_plan(&plan) {
            warn!(error = %e, "parsed plan failed validation");
            plan = Plan::single_message(
                &observation.channel_id,
                APOLOGY,
                "apologize",
                &format!("LLM planning failed: plan validation: {e}"),
                PlanSource::Fallback,
            );
        }

        // A model that planned zero steps still owes the user a reply.
        if plan.steps.is_empty() {
            plan.steps.push(clarification_step(&observation.channel_id));
        }

        // 11. Post-model sanitization (the observer sanitizes again).
        let corrections = sanitizer::sanitize_plan(zone, &mut plan, profile);
        if corrections > 0 {
            info!(corrections, "planner-level sanitization corrected output");
        }

        plan
    }

    /// Word-bounded assistant name or an at-mention of it.
    fn is_addressed(&self, content: &str) -> bool {
        let name = regex::escape(&self.config.address_name);
        let pattern = format!(r"(?i)(?:^|\W)@?{name}\b");
        Regex::new(&pattern)
            .map(|re| re.is_match(content))
            .unwrap_or(false)
    }

    /// Deterministic single-step plan for a mapped intent.
    fn intent_map_plan(&self, tool: &str, observation: &Observation) -> Plan {
        let mut args = Map::new();
        if tool.starts_with("guild.") {
            if let Some(guild_id) = &observation.guild_id {
                args.insert("guildId".to_owned(), guild_id.clone().into());
            }
            // Guild tools reply into the originating channel.
            args.insert(
                "channelId".to_owned(),
                observation.channel_id.clone().into(),
            );
        }
        if tool == "guild.mod.stats" {
            args.insert("windowHours".to_owned(), 24.into());
        }
        if tool == "user.remind" {
            args.insert("userId".to_owned(), observation.author_id.clone().into());
            args.insert("text".to_owned(), observation.content.clone().into());
            if let Some(time) = extract_time_phrase(&observation.content) {
                args.insert("time".to_owned(), time.into());
            }
        }

        Plan {
            steps: vec![PlanStep {
                tool: tool.to_owned(),
                args,
                reason: "deterministic intent match".to_owned(),
                confidence: Some(0.9),
            }],
            reasoning: format!("intent map resolved '{tool}'"),
            confidence: Some(0.9),
            source: PlanSource::IntentMap,
        }
    }

    /// Reflection, memory recall, and recent-conversation recall.
    fn shortcut_plan(&self, observation: &Observation) -> Option<Plan> {
        let content = observation.content.to_lowercase();

        // Recent-conversation recall: a quantified window like "5 minutes ago".
        static WINDOW_RE: OnceLock<Regex> = OnceLock::new();
        let window_re = WINDOW_RE.get_or_init(|| {
            Regex::new(r"(\d{1,4})\s*(minutes?|mins?|hours?|hrs?)\s+ago")
                .expect("window regex is valid")
        });
        if let Some(caps) = window_re.captures(&content) {
            let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str();
            let minutes = if unit.starts_with('h') {
                amount.saturating_mul(60)
            } else {
                amount
            };
            return Some(query_plan(
                observation,
                &observation.content,
                json!({ "mode": "recent", "windowMinutes": minutes }),
                "recall recent conversation",
            ));
        }

        // Memory recall: "who likes …", "what do you remember about …".
        if content.starts_with("who likes")
            || content.starts_with("who is")
            || content.contains("do you remember")
        {
            return Some(query_plan(
                observation,
                &observation.content,
                json!({}),
                "recall from memory",
            ));
        }

        // Reflection recall.
        if content.contains("reflect on") || content.starts_with("what have you learned") {
            return Some(query_plan(
                observation,
                &observation.content,
                json!({ "mode": "reflection" }),
                "surface reflections",
            ));
        }

        None
    }

    /// "call me X" → deterministic identity.update + confirmation.
    fn identity_preference_plan(
        &self,
        observation: &Observation,
        zone: IdentityZone,
    ) -> Option<Plan> {
        static CALL_ME_RE: OnceLock<Regex> = OnceLock::new();
        let re = CALL_ME_RE.get_or_init(|| {
            Regex::new(r"(?i)\bcall me ([A-Za-z0-9_-]{1,32})\b")
                .expect("call-me regex is valid")
        });

        let caps = re.captures(&observation.content)?;
        let name = caps.get(1)?.as_str().to_owned();

        let content_lower = observation.content.to_lowercase();
        let wants_private = content_lower.contains("in private")
            || content_lower.contains("privately")
            || content_lower.contains("just between us");

        let mut update_args = Map::new();
        update_args.insert("userId".to_owned(), observation.author_id.clone().into());
        if wants_private {
            update_args.insert("addPrivateAliases".to_owned(), json!([name]));
        } else {
            update_args.insert("addPublicAliases".to_owned(), json!([name]));
        }

        // Confirming a newly private name in a public channel would leak it.
        let confirmation = if wants_private && zone.is_public() {
            "Noted.".to_owned()
        } else {
            format!("Got it, I'll call you {name}.")
        };

        let mut send_args = Map::new();
        send_args.insert(
            "channelId".to_owned(),
            observation.channel_id.clone().into(),
        );
        send_args.insert("content".to_owned(), confirmation.into());

        Some(Plan {
            steps: vec![
                PlanStep {
                    tool: "identity.update".to_owned(),
                    args: update_args,
                    reason: "record addressing preference".to_owned(),
                    confidence: Some(0.95),
                },
                PlanStep {
                    tool: "message.send".to_owned(),
                    args: send_args,
                    reason: "confirm the preference".to_owned(),
                    confidence: Some(0.95),
                },
            ],
            reasoning: "identity preference update".to_owned(),
            confidence: Some(0.95),
            source: PlanSource::IntentMap,
        })
    }

    /// System prompt: planning rules, tone, and identity instructions.
    fn system_prompt(&self, zone: IdentityZone, profile: &IdentityProfile) -> String {
        let tone = emotion::current_emotion().prompt_hint();
        let tools_json = serialize_tools_for_prompt(&self.tools);

        let addressing_rules = match zone {
            IdentityZone::PublicGuild => {
                let safe = crate::identity::safe_name(profile);
                format!(
                    "This is a public channel. Refer to the user only as \"{safe}\". \
                     Never use any other name, nickname, or pet name for them."
                )
            }
            IdentityZone::PrivateDm | IdentityZone::Trusted => {
                let preferred = crate::identity::choose_addressing(zone, profile).primary_name;
                format!("This is a private conversation. You may address the user as \"{preferred}\".")
            }
        };

        format!(
            "You are {name}, an assistant that answers by planning tool calls.\n\
             \n\
             Respond with JSON only:\n\
             {{\"steps\":[{{\"tool\":\"tool.name\",\"args\":{{}},\"reason\":\"why\"}}],\"reasoning\":\"overall\"}}\n\
             \n\
             Rules:\n\
             - Use only the tools listed below.\n\
             - Reply to the user with a message.send step.\n\
             - {addressing_rules}\n\
             - Never list, quote, or hint at the user's stored aliases.\n\
             - {tone}\n\
             \n\
             Tools:\n{tools_json}",
            name = self.config.address_name,
        )
    }

    /// User prompt: the utterance plus retrieval context.
    fn user_prompt(
        &self,
        observation: &Observation,
        context: &Context,
        entity: Option<&crate::types::UserEntity>,
    ) -> String {
        let mut prompt = String::with_capacity(1024);

        prompt.push_str("## Message\n");
        prompt.push_str(&observation.content);
        prompt.push('\n');

        if let Some(display) = entity.and_then(|e| e.display.as_deref()) {
            prompt.push_str("\n## User\n");
            prompt.push_str(display);
            prompt.push('\n');
        }

        if !context.recent.is_empty() {
            prompt.push_str("\n## Recent\n");
            for snippet in &context.recent {
                prompt.push_str("- ");
                prompt.push_str(&snippet.content);
                prompt.push('\n');
            }
        }

        if !context.relevant.is_empty() {
            prompt.push_str("\n## Relevant memory\n");
            for snippet in &context.relevant {
                prompt.push_str("- ");
                prompt.push_str(&snippet.content);
                prompt.push('\n');
            }
        }

        prompt
    }
}

/// Serialize tool definitions as a JSON array for the model prompt.
fn serialize_tools_for_prompt(tools: &[ToolDefinition]) -> String {
    let prompt_tools: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "args": t.input_schema,
            })
        })
        .collect();
    serde_json::to_string_pretty(&prompt_tools).unwrap_or_else(|_| "[]".to_owned())
}

/// Single-step memory.query plan used by the shortcuts.
fn query_plan(observation: &Observation, q: &str, extra: Value, reason: &str) -> Plan {
    let mut args = Map::new();
    args.insert("q".to_owned(), q.into());
    args.insert(
        "channelId".to_owned(),
        observation.channel_id.clone().into(),
    );
    if let Some(extra_map) = extra.as_object() {
        for (k, v) in extra_map {
            args.insert(k.clone(), v.clone());
        }
    }

    Plan {
        steps: vec![PlanStep {
            tool: "memory.query".to_owned(),
            args,
            reason: reason.to_owned(),
            confidence: Some(0.85),
        }],
        reasoning: format!("direct shortcut: {reason}"),
        confidence: Some(0.85),
        source: PlanSource::IntentMap,
    }
}

/// A trailing time phrase for reminder fast paths ("remind me in 5m …").
fn extract_time_phrase(content: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?i)\bin\s+(\d{1,9}\s*(?:s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?|d|days?))\b",
        )
        .expect("time phrase regex is valid")
    });
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// The clarification step injected into empty plans.
fn clarification_step(channel_id: &str) -> PlanStep {
    let mut args = Map::new();
    args.insert("channelId".to_owned(), channel_id.into());
    args.insert("content".to_owned(), CLARIFICATION.into());
    PlanStep {
        tool: "message.send".to_owned(),
        args,
        reason: "ask for clarification".to_owned(),
        confidence: None,
    }
}

// ---------------------------------------------------------------------------
// Model-output parsing and recovery
// ---------------------------------------------------------------------------

/// Parse a model response into a plan with graded recovery.
///
/// Order of attempts:
/// 1. strict JSON (after stripping code fences)
/// 2. JSON with trailing commas stripped
/// 3. a `"content":"…"` substring recovered into a message plan
/// 4. short non-JSON text treated as the reply itself
/// 5. a generic apology
pub fn parse_llm_plan(response: &str, channel_id: &str) -> Plan {
    let cleaned = strip_code_fences(response.trim());

    if let Ok(plan) = serde_json::from_str::<Plan>(cleaned) {
        return plan;
    }

    let without_commas = strip_trailing_commas(cleaned);
    if let Ok(plan) = serde_json::from_str::<Plan>(&without_commas) {
        debug!("plan recovered after trailing-comma strip");
        return plan;
    }

    if let Some(content) = extract_content_field(cleaned) {
        debug!("plan recovered from a content field");
        return Plan::single_message(
            channel_id,
            &content,
            "send recovered reply",
            "LLM planning failed: recovered a content field from malformed JSON",
            PlanSource::Fallback,
        );
    }

    let looks_like_json = cleaned.contains('{') || cleaned.contains('[');
    if !looks_like_json && !cleaned.is_empty() && cleaned.len() <= SHORT_TEXT_THRESHOLD {
        return Plan::single_message(
            channel_id,
            cleaned,
            "send model text",
            "LLM planning failed: treated short non-JSON response as a plain message",
            PlanSource::Fallback,
        );
    }

    warn!(len = response.len(), "model response unrecoverable");
    Plan::single_message(
        channel_id,
        APOLOGY,
        "apologize",
        "LLM planning failed: response was not a parseable plan",
        PlanSource::Fallback,
    )
}

/// Structural validation applied to every parsed plan.
pub fn validate_plan(plan: &Plan) -> Result<(), String> {
    if plan.steps.len() > MAX_PLAN_STEPS {
        return Err(format!(
            "plan has {} steps, limit is {MAX_PLAN_STEPS}",
            plan.steps.len()
        ));
    }
    for (i, step) in plan.steps.iter().enumerate() {
        if step.tool.trim().is_empty() {
            return Err(format!("step {i} has an empty tool name"));
        }
        if let Some(confidence) = step.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(format!("step {i} confidence {confidence} out of range"));
            }
        }
    }
    if let Some(confidence) = plan.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("plan confidence {confidence} out of range"));
        }
    }
    Ok(())
}

/// Strip a surrounding markdown code fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Remove trailing commas before closing braces and brackets.
fn strip_trailing_commas(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r",\s*([}\]])").expect("trailing comma regex is valid")
    });
    re.replace_all(text, "$1").into_owned()
}

/// Pull the first `"content":"…"` string out of malformed JSON.
fn extract_content_field(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("content regex is valid")
    });
    let raw = re.captures(text)?.get(1)?.as_str();
    // Undo the common escapes so the reply reads naturally.
    let unescaped = raw
        .replace(r#"\""#, "\"")
        .replace(r"\n", "\n")
        .replace(r"\\", r"\");
    Some(unescaped)
}
