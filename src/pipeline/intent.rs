//! Intent resolution.
//!
//! Combines three signal sources into one [`IntentDecision`]:
//! a deterministic intent map (phrase → canonical tool), a skill-graph
//! similarity query, and fallback NLP heuristics. The decision carries
//! the gating mode and allow-list the plan must pass through before
//! execution.
//!
//! Conversational and qualitative phrases must never map to guild
//! intents; they fall through to the language-model planner.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::skills::SkillGraph;
use crate::types::{Context, GatingMode, IntentDecision, Observation};

/// Words that mark an utterance as conversational rather than operational.
const CONVERSATIONAL_MARKERS: &[&str] = &["vibe", "vibes", "feel", "feels", "feeling", "busy today"];

/// Connectives that mark long multi-clause inputs.
const CLAUSE_CONNECTIVES: &[&str] = &[" and ", " then ", " but "];

/// Word count above which connectives make an input conversational.
const LONG_INPUT_WORDS: usize = 12;

/// One deterministic phrase → tool mapping.
struct IntentMapping {
    phrases: &'static [&'static str],
    intent: &'static str,
    tool: &'static str,
    /// Strict gating requires a guild context to make sense.
    guild_scoped: bool,
}

/// The deterministic intent map.
const INTENT_MAP: &[IntentMapping] = &[
    IntentMapping {
        phrases: &["member count", "how many members", "how many people are here"],
        intent: "guild.member.count",
        tool: "guild.member.count",
        guild_scoped: true,
    },
    IntentMapping {
        phrases: &["mod stats", "moderation stats", "moderation report"],
        intent: "guild.mod.stats",
        tool: "guild.mod.stats",
        guild_scoped: true,
    },
    IntentMapping {
        phrases: &["what can you do", "list your tools", "capabilities"],
        intent: "system.capabilities",
        tool: "system.capabilities",
        guild_scoped: false,
    },
    IntentMapping {
        phrases: &["remind me"],
        intent: "user.remind",
        tool: "user.remind",
        guild_scoped: false,
    },
];

/// Resolves intents for the observer.
pub struct IntentEngine {
    skills: Arc<SkillGraph>,
}

impl IntentEngine {
    /// Create an engine over the shared skill graph.
    pub fn new(skills: Arc<SkillGraph>) -> Self {
        Self { skills }
    }

    /// Produce a decision for one observation.
    ///
    /// Infallible: internal failures (e.g. an unreachable skill store)
    /// degrade to the NLP fallback signal.
    pub async fn resolve(&self, observation: &Observation, _context: &Context) -> IntentDecision {
        let content = observation.content.to_lowercase();

        // Conversational inputs skip the map entirely; the planner's
        // language model handles them.
        if is_conversational(&content) {
            debug!(observation = %observation.id, "conversational input, skipping intent map");
            return nlp_fallback(&content, "conversational");
        }

        if let Some(mapping) = lookup_intent(&content) {
            if mapping.guild_scoped && observation.guild_id.is_none() {
                debug!(
                    intent = mapping.intent,
                    "guild intent matched outside a guild, falling through"
                );
            } else {
                return IntentDecision {
                    source: "intent-map".to_owned(),
                    intent: Some(mapping.intent.to_owned()),
                    confidence: 0.9,
                    gating: GatingMode::Strict,
                    allowed_tools: vec![mapping.tool.to_owned()],
                    meta: json!({ "matchedPhrase": true }),
                    contributing_signals: vec!["intent-map".to_owned()],
                    resolved_at: Utc::now(),
                    skill_match: None,
                };
            }
        }

        // Skill-graph similarity signal.
        if let Some(skill_match) = self.skills.find_replay(&observation.content).await {
            let confidence = skill_match.similarity.clamp(0.0, 1.0);
            return IntentDecision {
                source: "skill-graph".to_owned(),
                intent: Some(skill_match.skill.intent.clone()),
                confidence,
                gating: GatingMode::Soft,
                allowed_tools: skill_match
                    .skill
                    .actions
                    .iter()
                    .map(|a| a.tool.clone())
                    .collect(),
                meta: json!({ "similarity": skill_match.similarity }),
                contributing_signals: vec!["skill-graph".to_owned()],
                resolved_at: Utc::now(),
                skill_match: Some(skill_match),
            };
        }

        nlp_fallback(&content, "nlp")
    }
}

/// Find the first mapping whose phrase occurs in the content.
fn lookup_intent(content: &str) -> Option<&'static IntentMapping> {
    INTENT_MAP
        .iter()
        .find(|m| m.phrases.iter().any(|p| content.contains(p)))
}

/// True for qualitative phrases and long multi-clause inputs.
fn is_conversational(content: &str) -> bool {
    if CONVERSATIONAL_MARKERS.iter().any(|m| content.contains(m)) {
        return true;
    }
    let word_count = content.split_whitespace().count();
    word_count > LONG_INPUT_WORDS
        && CLAUSE_CONNECTIVES.iter().any(|c| content.contains(c))
}

/// Fallback NLP signal: soft gating, no allow-list, middling confidence.
fn nlp_fallback(content: &str, signal: &str) -> IntentDecision {
    let intent = content.contains('?').then(|| "question".to_owned());
    IntentDecision {
        source: "nlp".to_owned(),
        intent,
        confidence: 0.5,
        gating: GatingMode::Soft,
        allowed_tools: Vec::new(),
        meta: serde_json::Value::Null,
        contributing_signals: vec![signal.to_owned()],
        resolved_at: Utc::now(),
        skill_match: None,
    }
}
