//! Plan gating.
//!
//! Applied after plan construction and before execution. Strict gating
//! drops every step whose tool is outside the intent's allow-list
//! (`message.send` is always permitted so the agent can still answer);
//! an emptied plan is replaced with one safe informational reply. Soft
//! gating keeps everything but logs the out-of-list tools. `None` is a
//! no-op.

use tracing::{info, warn};

use crate::types::{GatingMode, IntentDecision, Plan, PlanSource};

/// Reply used when strict gating empties a plan.
const UNAVAILABLE_MESSAGE: &str =
    "Sorry, that action is not available in this context.";

/// Apply the decision's gating mode to the plan in place.
pub fn apply(plan: &mut Plan, decision: &IntentDecision, channel_id: &str) {
    match decision.gating {
        GatingMode::None => {}
        GatingMode::Soft => {
            let outside: Vec<&str> = plan
                .steps
                .iter()
                .map(|s| s.tool.as_str())
                .filter(|tool| {
                    *tool != "message.send"
                        && !decision.allowed_tools.iter().any(|a| a == tool)
                })
                .collect();
            if !outside.is_empty() && !decision.allowed_tools.is_empty() {
                info!(tools = ?outside, "soft gating: steps outside the allow-list");
            }
        }
        GatingMode::Strict => {
            let before = plan.steps.len();
            plan.steps.retain(|step| {
                step.tool == "message.send"
                    || decision.allowed_tools.iter().any(|a| *a == step.tool)
            });
            let dropped = before.saturating_sub(plan.steps.len());
            if dropped > 0 {
                warn!(dropped, allowed = ?decision.allowed_tools, "strict gating dropped steps");
            }

            // Only substitute when gating itself emptied the plan; a plan
            // that arrived empty (e.g. "not addressed") stays empty.
            if plan.steps.is_empty() && before > 0 {
                warn!("strict gating emptied the plan, substituting a safe reply");
                *plan = Plan::single_message(
                    channel_id,
                    UNAVAILABLE_MESSAGE,
                    "explain unavailable action",
                    "strict gating removed every planned step",
                    PlanSource::Fallback,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlanStep;
    use chrono::Utc;

    fn decision(gating: GatingMode, allowed: &[&str]) -> IntentDecision {
        IntentDecision {
            source: "intent-map".to_owned(),
            intent: None,
            confidence: 0.9,
            gating,
            allowed_tools: allowed.iter().map(|s| (*s).to_owned()).collect(),
            meta: serde_json::Value::Null,
            contributing_signals: Vec::new(),
            resolved_at: Utc::now(),
            skill_match: None,
        }
    }

    fn step(tool: &str) -> PlanStep {
        PlanStep {
            tool: tool.to_owned(),
            args: serde_json::Map::new(),
            reason: "test".to_owned(),
            confidence: None,
        }
    }

    fn plan_of(tools: &[&str]) -> Plan {
        Plan {
            steps: tools.iter().map(|t| step(t)).collect(),
            reasoning: "test".to_owned(),
            confidence: None,
            source: PlanSource::Llm,
        }
    }

    #[test]
    fn test_strict_keeps_allowed_and_message_send() {
        let mut plan = plan_of(&["guild.member.count", "system.capabilities", "message.send"]);
        apply(&mut plan, &decision(GatingMode::Strict, &["guild.member.count"]), "c1");

        let tools: Vec<&str> = plan.steps.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(tools, vec!["guild.member.count", "message.send"]);
    }

    #[test]
    fn test_strict_empty_result_substitutes_safe_reply() {
        let mut plan = plan_of(&["system.capabilities"]);
        apply(&mut plan, &decision(GatingMode::Strict, &["guild.member.count"]), "c9");

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "message.send");
        assert_eq!(plan.source, PlanSource::Fallback);
        let content = plan.steps[0].args["content"].as_str().expect("content");
        assert!(content.contains("not available in this context"));
        assert_eq!(plan.steps[0].args["channelId"], "c9");
    }

    #[test]
    fn test_strict_leaves_deliberately_empty_plans_alone() {
        let mut plan = plan_of(&[]);
        apply(&mut plan, &decision(GatingMode::Strict, &["guild.member.count"]), "c1");
        assert!(plan.steps.is_empty(), "an unaddressed plan stays silent");
    }

    #[test]
    fn test_soft_keeps_everything() {
        let mut plan = plan_of(&["system.capabilities", "guild.member.count"]);
        apply(&mut plan, &decision(GatingMode::Soft, &["guild.member.count"]), "c1");
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn test_none_is_a_no_op() {
        let mut plan = plan_of(&["anything.at.all"]);
        apply(&mut plan, &decision(GatingMode::None, &[]), "c1");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "anything.at.all");
    }
}
