// Core data model for the reasoning pipeline.
//
// Everything here is request-scoped: an Observation and the structs derived
// from it live for exactly one pipeline run. Long-lived state (skills,
// candidates) lives in the skills module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::skills::SkillMatch;

/// One inbound chat-style message to be processed.
///
/// Immutable input. `guild_id` absent means the message arrived as a
/// direct message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Unique observation id assigned by the gateway.
    pub id: String,
    /// Observation kind (e.g. "message").
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw utterance text.
    pub content: String,
    /// Stable author identifier.
    pub author_id: String,
    /// Channel the message arrived on.
    pub channel_id: String,
    /// Guild (server) id; `None` for direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Arrival time; defaults to now when the gateway omits it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Display name the author currently uses, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_display_name: Option<String>,
}

/// A recent-conversation snippet inside a [`Context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSnippet {
    /// Snippet text.
    pub content: String,
    /// ISO timestamp; filled with "now" when the store had none.
    pub timestamp: String,
}

/// A relevance-ranked snippet inside a [`Context`].
///
/// Scores are preserved exactly as the memory service returned them;
/// they are not clamped to `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantSnippet {
    /// Snippet text.
    pub content: String,
    /// Similarity score as reported by hybrid search.
    pub score: f64,
}

/// Bounded retrieval context for one observation.
///
/// Built by the retriever, read-only downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    /// Up to five recent snippets.
    pub recent: Vec<RecentSnippet>,
    /// Relevance-ordered snippets from hybrid search.
    pub relevant: Vec<RelevantSnippet>,
    /// The author's entity, when the store had one.
    pub user_entity: Option<UserEntity>,
}

/// A user entity as stored by the memory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntity {
    /// Canonical entity id (`user:<author_id>`).
    pub id: String,
    /// Known aliases in store order.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Free-form trait bag; `traits.identity` carries identity preferences.
    #[serde(default)]
    pub traits: serde_json::Value,
    /// Preferred display name, when set.
    #[serde(default)]
    pub display: Option<String>,
}

/// Identity preferences carried under `traits.identity`.
///
/// Alias arrays may contain junk from older writers; profile construction
/// filters non-string entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityTraits {
    pub public_aliases: Vec<serde_json::Value>,
    pub private_aliases: Vec<serde_json::Value>,
    pub allow_auto_intimate: bool,
}

/// Trust context an observation arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityZone {
    /// A guild channel anyone in the guild can read.
    PublicGuild,
    /// A one-on-one direct message.
    PrivateDm,
    /// Reserved for channel-level trust flags; treated like a DM.
    Trusted,
}

impl IdentityZone {
    /// True when outward content is visible beyond the author.
    pub fn is_public(self) -> bool {
        self == Self::PublicGuild
    }
}

impl std::fmt::Display for IdentityZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PublicGuild => f.write_str("PUBLIC_GUILD"),
            Self::PrivateDm => f.write_str("PRIVATE_DM"),
            Self::Trusted => f.write_str("TRUSTED"),
        }
    }
}

/// Validated identity view of one author.
///
/// Invariant: `public_aliases` never contains any member of
/// `private_aliases`, compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub user_id: String,
    pub public_aliases: Vec<String>,
    pub private_aliases: Vec<String>,
    pub allow_auto_intimate: bool,
    pub last_known_display_name: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// How the agent may address the author in the current zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingChoice {
    /// Name to lead with.
    pub primary_name: String,
    /// Name guaranteed safe for the zone; never a private alias in public.
    pub safe_name: String,
    /// Intimate alias, present only when one exists.
    pub intimate_name: Option<String>,
    /// Whether the intimate alias may be used.
    pub use_intimate: bool,
}

/// Plan-level tool policy applied between planning and execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatingMode {
    /// Only allow-listed tools (plus `message.send`) survive.
    Strict,
    /// Everything survives; out-of-list tools are logged.
    Soft,
    /// No filtering.
    None,
}

/// Where an intent decision came from and what it permits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDecision {
    /// Signal source ("intent-map", "skill-graph", "nlp", "fallback").
    pub source: String,
    /// Canonical intent, when one resolved.
    pub intent: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Gating mode the planner output must pass through.
    pub gating: GatingMode,
    /// Tools the intent permits under strict gating.
    pub allowed_tools: Vec<String>,
    /// Free-form signal metadata.
    #[serde(default)]
    pub meta: serde_json::Value,
    /// Names of the signals that contributed to this decision.
    #[serde(default)]
    pub contributing_signals: Vec<String>,
    /// When the decision was made.
    pub resolved_at: DateTime<Utc>,
    /// Replayable skill, when the skill graph reported a usable match.
    #[serde(default)]
    pub skill_match: Option<SkillMatch>,
}

impl IntentDecision {
    /// The safe default used when intent resolution fails entirely.
    pub fn fallback() -> Self {
        Self {
            source: "fallback".to_owned(),
            intent: None,
            confidence: 0.5,
            gating: GatingMode::Soft,
            allowed_tools: Vec::new(),
            meta: serde_json::Value::Null,
            contributing_signals: Vec::new(),
            resolved_at: Utc::now(),
            skill_match: None,
        }
    }
}

/// Which stage produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanSource {
    /// Parsed from a language-model response.
    Llm,
    /// Deterministic intent-map fast path.
    IntentMap,
    /// Replayed from a promoted skill.
    SkillGraph,
    /// Last-resort safe plan.
    Fallback,
}

impl PlanSource {
    /// Serde default: plans parsed off the wire came from the LLM.
    fn default_llm() -> Self {
        Self::Llm
    }
}

/// One tool invocation inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Registered tool name (e.g. "message.send").
    pub tool: String,
    /// Argument bag passed to the tool.
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Why the planner chose this step.
    #[serde(default)]
    pub reason: String,
    /// Optional per-step confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// An ordered action plan for one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Planner rationale.
    #[serde(default)]
    pub reasoning: String,
    /// Optional overall confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Which stage produced the plan.
    #[serde(default = "PlanSource::default_llm")]
    pub source: PlanSource,
}

impl Plan {
    /// A single-step `message.send` plan.
    pub fn single_message(
        channel_id: &str,
        content: &str,
        reason: &str,
        reasoning: &str,
        source: PlanSource,
    ) -> Self {
        let mut args = serde_json::Map::new();
        args.insert("channelId".to_owned(), channel_id.into());
        args.insert("content".to_owned(), content.into());
        Self {
            steps: vec![PlanStep {
                tool: "message.send".to_owned(),
                args,
                reason: reason.to_owned(),
                confidence: None,
            }],
            reasoning: reasoning.to_owned(),
            confidence: None,
            source,
        }
    }
}

/// Timing and identity metadata attached to every tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub tool: String,
    pub ms: u64,
    pub trace_id: String,
    pub ts: DateTime<Utc>,
}

/// The bounded record of a single tool invocation.
///
/// Produced exactly once per attempted call. `ok` is authoritative;
/// `output` is the raw tool return; `error` is a human-readable string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub trace_id: String,
    pub tool: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds spent in the call.
    pub ms: u64,
    /// Arguments the tool was invoked with (post-enrichment).
    pub input: serde_json::Value,
    /// Raw tool return value.
    pub output: serde_json::Value,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
}

/// A plan step paired with the envelope its execution produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    /// Index of the step within the plan (0-based).
    pub step: usize,
    /// Result envelope for that step.
    pub envelope: ToolEnvelope,
}

/// Outcome of executing a whole plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff every envelope reported `ok`.
    pub success: bool,
    /// Per-step envelopes in execution order.
    pub outputs: Vec<StepOutput>,
}

impl ExecutionResult {
    /// Build a result from envelopes, computing `success` as the AND of
    /// every envelope's `ok`.
    pub fn from_outputs(outputs: Vec<StepOutput>) -> Self {
        let success = outputs.iter().all(|o| o.envelope.ok);
        Self { success, outputs }
    }
}
