//! End-to-end pipeline scenarios driven through the observer.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{harness, harness_with, message_plan_json, observation, seed_identity};
use vigil::skills::{Skill, SkillAction, SkillMatch, SkillStats, SkillStatus};
use vigil::types::{GatingMode, PlanSource};

/// Sanitization in a public channel: a private alias in model output is
/// rewritten to the safe name before execution.
#[tokio::test]
async fn test_public_channel_sanitization() {
    let plan = r#"{"steps":[{"tool":"message.send","args":{"channelId":"c1","content":"Hi Kaelen!"},"reason":"greet"}],"reasoning":"greet"}"#;
    let mut h = harness(&[plan]);
    seed_identity(&h.memory, &["TheLinQuei"], &["Kaelen", "baby"], true);

    let report = h
        .observer
        .observe(observation("hi", Some("g1"), Some("TheLinQuei")))
        .await;

    assert!(report.execution.success);
    let sent = h.outbound_rx.recv().await.expect("message sent");
    assert!(!sent.content.contains("Kaelen"));
    assert!(!sent.content.contains("baby"));
    assert!(sent.content.contains("TheLinQuei"));
}

/// Private-DM preservation: intimate aliases survive untouched.
#[tokio::test]
async fn test_private_dm_preserves_aliases() {
    let plan = r#"{"steps":[{"tool":"message.send","args":{"channelId":"c1","content":"hey baby Kaelen, missed you"},"reason":"greet"}],"reasoning":"greet"}"#;
    let mut h = harness(&[plan]);
    seed_identity(&h.memory, &["TheLinQuei"], &["Kaelen", "baby"], true);

    let report = h
        .observer
        .observe(observation("hey you", None, Some("TheLinQuei")))
        .await;

    assert!(report.execution.success);
    assert_eq!(report.sanitizer_corrections, 0);
    let sent = h.outbound_rx.recv().await.expect("message sent");
    assert!(sent.content.contains("baby"));
    assert!(sent.content.contains("Kaelen"));
}

/// Substring safety: aliases never fire inside longer words.
#[tokio::test]
async fn test_substring_inside_word_is_not_sanitized() {
    let content = "Let me check the history for you";
    let plan = message_plan_json("c1", content);
    let mut h = harness(&[&plan]);
    // "hi" and "his" are private; "history" must still pass unchanged.
    seed_identity(&h.memory, &["TheLinQuei"], &["hi", "his"], false);

    h.observer
        .observe(observation(
            "vi can you look that up",
            Some("g1"),
            Some("TheLinQuei"),
        ))
        .await;

    let sent = h.outbound_rx.recv().await.expect("message sent");
    assert_eq!(sent.content, content);
}

/// Fallback plan on malformed model output: the text becomes the reply
/// and the reasoning records the failure.
#[tokio::test]
async fn test_fallback_plan_on_malformed_llm() {
    let mut h = harness(&["I am sorry, I cannot help."]);

    let report = h.observer.observe(observation("do a thing", None, None)).await;

    assert_eq!(report.plan.source, PlanSource::Fallback);
    assert!(
        report.plan.reasoning.starts_with("LLM planning failed"),
        "got: {}",
        report.plan.reasoning
    );
    let sent = h.outbound_rx.recv().await.expect("message sent");
    assert_eq!(sent.content, "I am sorry, I cannot help.");
}

/// Strict gating with an empty survivor set: the plan becomes one safe
/// informational reply.
#[tokio::test]
async fn test_strict_gating_empty_result() {
    use vigil::pipeline::gating;
    use vigil::types::IntentDecision;

    // A strict decision allowing only guild.member.count, against a model
    // plan that only wants system.capabilities.
    let mut plan: vigil::types::Plan = serde_json::from_str(
        r#"{"steps":[{"tool":"system.capabilities","args":{},"reason":"list"}],"reasoning":"show tools"}"#,
    )
    .expect("valid plan json");

    let decision = IntentDecision {
        gating: GatingMode::Strict,
        allowed_tools: vec!["guild.member.count".to_owned()],
        ..IntentDecision::fallback()
    };

    gating::apply(&mut plan, &decision, "c1");

    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].tool, "message.send");
    let content = plan.steps[0].args["content"].as_str().expect("content");
    assert!(content.contains("not available in this context"));
}

/// Skill replay: a usable stored skill bypasses the language model.
#[tokio::test]
async fn test_skill_replay_bypasses_llm() {
    let mut h = harness(&[]);
    *h.memory.skill_matches.lock().expect("test lock") = vec![SkillMatch {
        skill: Skill {
            id: Some("s1".to_owned()),
            intent: "hello everyone".to_owned(),
            pattern: "hello".to_owned(),
            actions: vec![SkillAction {
                tool: "message.send".to_owned(),
                input: serde_json::json!({ "content": "replayed" }),
            }],
            inputs: Vec::new(),
            outputs: Vec::new(),
            created_at: chrono::Utc::now(),
            last_used: Some(chrono::Utc::now()),
            metadata: serde_json::Value::Null,
        },
        similarity: 0.91,
        stats: SkillStats {
            status: SkillStatus::Active,
            success_rate: 0.88,
            executions: 9,
        },
    }];

    let report = h
        .observer
        .observe(observation("hello there", Some("g1"), None))
        .await;

    assert_eq!(report.plan.source, PlanSource::SkillGraph);
    assert_eq!(h.llm.calls(), 0, "replay must not call the model");
    let sent = h.outbound_rx.recv().await.expect("message sent");
    assert_eq!(sent.content, "replayed");
}

/// Intent-map fast path: a reminder phrase becomes a user.remind step
/// without a model call, and the reminder lands in the queue.
#[tokio::test]
async fn test_reminder_fast_path() {
    let mut h = harness(&[]);

    let report = h
        .observer
        .observe(observation(
            "remind me in 5 minutes to stretch",
            Some("g1"),
            None,
        ))
        .await;

    assert_eq!(report.plan.source, PlanSource::IntentMap);
    assert_eq!(h.llm.calls(), 0);
    assert!(report.execution.success);

    let reminder = h.reminder_rx.recv().await.expect("reminder queued");
    assert_eq!(reminder.user_id, "u1");

    let delay = reminder
        .deliver_at
        .signed_duration_since(chrono::Utc::now())
        .num_seconds();
    assert!((290..=300).contains(&delay), "≈300s, got {delay}");
}

/// Guild introspection fast path under strict gating.
#[tokio::test]
async fn test_member_count_fast_path() {
    let h = harness(&[]);

    let report = h
        .observer
        .observe(observation("what's the member count?", Some("g1"), None))
        .await;

    assert_eq!(report.decision.gating, GatingMode::Strict);
    assert_eq!(report.plan.source, PlanSource::IntentMap);
    assert!(report.execution.success);
    assert_eq!(report.execution.outputs[0].envelope.tool, "guild.member.count");
    assert_eq!(report.execution.outputs[0].envelope.output["count"], 128);
}

/// Identity preference: "call me X" runs the deterministic two-step plan
/// and the preference lands in the entity store.
#[tokio::test]
async fn test_identity_preference_update() {
    let mut h = harness(&[]);
    seed_identity(&h.memory, &["TheLinQuei"], &[], false);

    let report = h
        .observer
        .observe(observation("please call me Sparrow", None, Some("TheLinQuei")))
        .await;

    assert!(report.execution.success);
    assert_eq!(report.plan.steps.len(), 2);
    assert_eq!(report.plan.steps[0].tool, "identity.update");
    assert_eq!(report.plan.steps[1].tool, "message.send");

    let sent = h.outbound_rx.recv().await.expect("confirmation sent");
    assert!(sent.content.contains("Sparrow"));

    let entities = h.memory.entities.lock().expect("test lock");
    let entity = entities.get("user:u1").expect("entity exists");
    let aliases = entity.traits["identity"]["publicAliases"]
        .as_array()
        .expect("alias array");
    assert!(aliases.iter().any(|a| a == "Sparrow"));
}

/// Memory-recall shortcut: "who likes …" becomes a memory.query step
/// without a model call.
#[tokio::test]
async fn test_memory_recall_shortcut() {
    use vigil::memory::SearchHit;

    let h = harness(&[]);
    *h.memory.hits.lock().expect("test lock") = vec![SearchHit {
        content: "u2 likes meows".to_owned(),
        score: 0.93,
        timestamp: None,
    }];

    let report = h
        .observer
        .observe(observation("who likes meows", None, None))
        .await;

    assert_eq!(h.llm.calls(), 0, "shortcut bypasses the model");
    assert_eq!(report.plan.steps[0].tool, "memory.query");
    assert!(report.execution.success);
    assert_eq!(
        report.execution.outputs[0].envelope.output["answer"],
        "u2 likes meows"
    );
}

/// Ambient filter: unaddressed guild chatter plans nothing; an addressed
/// message goes through.
#[tokio::test]
async fn test_ambient_filter_requires_address() {
    let plan = message_plan_json("c1", "here!");
    let mut h = harness_with(&[&plan], |config| {
        config.require_address = true;
    });

    let report = h
        .observer
        .observe(observation("nice weather lately", Some("g1"), None))
        .await;
    assert!(report.plan.steps.is_empty(), "unaddressed input plans nothing");
    assert_eq!(report.plan.reasoning, "not addressed");
    assert_eq!(h.llm.calls(), 0);

    let report = h
        .observer
        .observe(observation("vi, you around?", Some("g1"), None))
        .await;
    assert_eq!(h.llm.calls(), 1);
    assert!(report.execution.success);
    let sent = h.outbound_rx.recv().await.expect("message sent");
    assert_eq!(sent.content, "here!");
}

/// Empty model plans get a clarification step injected.
#[tokio::test]
async fn test_empty_plan_injects_clarification() {
    let mut h = harness(&[r#"{"steps":[],"reasoning":"nothing to do"}"#]);

    let report = h.observer.observe(observation("hmm", None, None)).await;

    assert_eq!(report.plan.steps.len(), 1);
    assert_eq!(report.plan.steps[0].tool, "message.send");
    let sent = h.outbound_rx.recv().await.expect("clarification sent");
    assert!(sent.content.to_lowercase().contains("clarify"));
}

/// Reflection persists with the original (unsanitized) observation text,
/// and execution results flow into the skill graph.
#[tokio::test]
async fn test_reflection_and_skill_recording() {
    let plan = message_plan_json("c1", "done");
    let h = harness(&[&plan]);
    seed_identity(&h.memory, &["TheLinQuei"], &["Kaelen"], true);

    let report = h
        .observer
        .observe(observation(
            "vi tell Kaelen the build passed",
            Some("g1"),
            Some("TheLinQuei"),
        ))
        .await;

    assert!(report.reflected);
    let reflections = h.memory.reflections.lock().expect("test lock");
    let reflection = reflections.first().expect("reflection persisted");
    assert_eq!(reflection.meta["type"], "system-reflection");
    assert!(
        reflection.text.contains("Kaelen"),
        "audit trail keeps the raw utterance"
    );
    drop(reflections);

    assert_eq!(h.skills.history_len().await, 1);
    assert_eq!(h.metrics.pipeline_runs(), 1);
}

/// Reflection failure falls back to the identity-only sync.
#[tokio::test]
async fn test_reflection_failure_identity_fallback() {
    let plan = message_plan_json("c1", "ok");
    let h = harness(&[&plan]);
    seed_identity(&h.memory, &["TheLinQuei"], &["Kaelen"], true);
    h.memory.fail_reflect.store(true, Ordering::SeqCst);

    let report = h
        .observer
        .observe(observation("hello vi", Some("g1"), Some("TheLinQuei")))
        .await;

    assert!(!report.reflected);
    assert!(report.execution.success, "pipeline continues past reflection");

    // The identity-only upsert still ran.
    let entities = h.memory.entities.lock().expect("test lock");
    let entity = entities.get("user:u1").expect("entity exists");
    assert_eq!(
        entity.traits["identity"]["privateAliases"],
        serde_json::json!(["Kaelen"])
    );
}

/// The observer survives a dead memory service and a dry model: the last
/// resort is still a delivered apology, never a crash.
#[tokio::test]
async fn test_observer_survives_total_backend_failure() {
    let mut h = harness(&[]);
    h.memory.fail_everything.store(true, Ordering::SeqCst);

    let report = h
        .observer
        .observe(observation("anyone there?", None, None))
        .await;

    assert_eq!(report.plan.source, PlanSource::Fallback);
    assert!(!report.reflected);
    let sent = h.outbound_rx.recv().await.expect("apology still delivered");
    assert!(!sent.content.is_empty());
}

/// Three straight successful runs of the same plan promote a skill.
#[tokio::test]
async fn test_repeated_success_promotes_skill() {
    let plan = message_plan_json("c1", "hello!");
    let h = harness(&[&plan, &plan, &plan]);

    for _ in 0..3 {
        let report = h
            .observer
            .observe(observation("say hello", None, None))
            .await;
        assert!(report.execution.success);
    }

    let promoted = h.memory.promoted.lock().expect("test lock");
    assert_eq!(promoted.len(), 1, "streak of three promotes exactly once");
    assert_eq!(promoted[0].actions[0].tool, "message.send");
}

/// Executor retry law: an invalid-then-valid tool output means exactly
/// two invocations and a successful step; the plan continues.
#[tokio::test]
async fn test_executor_retry_on_schema_mismatch() {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use vigil::metrics::CountingMetrics;
    use vigil::pipeline::executor::Executor;
    use vigil::tools::{Tool, ToolDefinition, ToolError, ToolRegistry};

    struct FlakyTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "message.send"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "message.send".to_owned(),
                description: "flaky".to_owned(),
                input_schema: json!({ "type": "object" }),
            }
        }

        fn output_schema(&self) -> Value {
            json!({
                "type": "object",
                "required": ["ok"],
                "properties": { "ok": { "type": "boolean" }, "status": { "type": "integer" } }
            })
        }

        async fn call(&self, _args: Value) -> Result<Value, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(json!({ "missingOk": true }))
            } else {
                Ok(json!({ "ok": true, "status": 200 }))
            }
        }
    }

    let flaky = Arc::new(FlakyTool {
        calls: AtomicUsize::new(0),
    });
    let mut registry = ToolRegistry::new(Arc::new(CountingMetrics::default()));
    registry.register(flaky.clone());
    let executor = Executor::new(Arc::new(registry), HashMap::new());

    let plan: vigil::types::Plan =
        serde_json::from_str(&message_plan_json("c1", "retry me")).expect("valid plan");
    let result = executor
        .execute(&plan, &observation("x", None, None))
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.len(), 1);
    assert!(result.outputs[0].envelope.ok);
    assert_eq!(
        flaky.calls.load(Ordering::SeqCst),
        2,
        "invalid-then-valid is exactly two invocations"
    );
    assert_eq!(result.outputs[0].envelope.output["status"], 200);
}
