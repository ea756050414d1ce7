//! Procedural memory: the skill graph.
//!
//! Tracks every executed plan in a bounded history, buckets identical
//! `(intent, actions)` pairs into candidates, promotes candidates that
//! prove themselves to the skill store, and periodically decays stored
//! skills that stop earning their keep.
//!
//! The graph is the only cross-observation state in the pipeline. All
//! mutation goes through one async mutex so concurrently running
//! pipelines serialize their recordings.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SkillConfig;
use crate::memory::MemoryApi;

/// Maximum execution records kept in the in-memory history ring.
const HISTORY_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Lifecycle status of a stored skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    /// Normal, replayable.
    Active,
    /// Proven reliable; surfaced first.
    Preferred,
    /// Below the success floor; not replayed.
    Demoted,
    /// Unused too long; not replayed.
    Archived,
}

/// One recorded action inside a skill or candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillAction {
    /// Tool the action invokes.
    pub tool: String,
    /// Arguments recorded at capture time.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// A persisted skill as the memory service stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    /// Store-assigned id; absent on promotion requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Intent the skill answers.
    pub intent: String,
    /// Context hash the skill was bucketed under.
    pub pattern: String,
    /// Replayable action sequence.
    pub actions: Vec<SkillAction>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Aggregate execution statistics the store keeps per skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillStats {
    /// Current lifecycle status.
    pub status: SkillStatus,
    /// Fraction of successful executions in `[0, 1]`.
    pub success_rate: f64,
    /// Total recorded executions.
    #[serde(default)]
    pub executions: u32,
}

/// A similarity match returned by skill search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMatch {
    /// The stored skill.
    pub skill: Skill,
    /// Similarity between the query intent and the stored pattern.
    /// Listing endpoints omit it; search endpoints always set it.
    #[serde(default)]
    pub similarity: f64,
    /// Store-side execution statistics.
    pub stats: SkillStats,
}

// ---------------------------------------------------------------------------
// Local accounting
// ---------------------------------------------------------------------------

/// One executed plan, as remembered by the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub intent: String,
    pub actions: Vec<SkillAction>,
    pub success: bool,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub context_hash: String,
}

/// An unpromoted pattern waiting to meet the promotion thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCandidate {
    pub intent: String,
    /// Context hash bucketing identical plan bodies.
    pub pattern: String,
    pub actions: Vec<SkillAction>,
    /// Consecutive successes; reset to zero on any failure.
    pub success_streak: u32,
    pub total_executions: u32,
    pub success_count: u32,
}

impl SkillCandidate {
    fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(self.total_executions)
    }
}

struct GraphState {
    history: VecDeque<ExecutionRecord>,
    candidates: HashMap<String, SkillCandidate>,
}

/// Bounded-history procedural memory with promotion and decay.
pub struct SkillGraph {
    state: Mutex<GraphState>,
    memory: Arc<dyn MemoryApi>,
    config: SkillConfig,
}

impl SkillGraph {
    /// Create an empty graph backed by the given skill store.
    pub fn new(memory: Arc<dyn MemoryApi>, config: SkillConfig) -> Self {
        Self {
            state: Mutex::new(GraphState {
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                candidates: HashMap::new(),
            }),
            memory,
            config,
        }
    }

    /// Stable digest bucketing identical plan bodies under identical intents.
    ///
    /// Digest input: `intent || "::" || join("|", tool + ":" + JSON(input))`.
    pub fn context_hash(intent: &str, actions: &[SkillAction]) -> String {
        let joined: Vec<String> = actions
            .iter()
            .map(|a| {
                let input = serde_json::to_string(&a.input).unwrap_or_else(|_| "null".to_owned());
                format!("{}:{input}", a.tool)
            })
            .collect();
        let preimage = format!("{intent}::{}", joined.join("|"));

        let mut hasher = Sha256::new();
        hasher.update(preimage.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Record one executed plan and run promotion accounting.
    ///
    /// Never fails: a store refusal during promotion is logged with the
    /// full candidate serialization and the candidate stays in place.
    pub async fn record_execution(
        &self,
        intent: &str,
        actions: Vec<SkillAction>,
        success: bool,
        latency_ms: u64,
    ) {
        if intent.is_empty() || actions.is_empty() {
            debug!("skill graph skipping empty intent or action list");
            return;
        }

        let context_hash = Self::context_hash(intent, &actions);
        let promotable = {
            let mut state = self.state.lock().await;

            if state.history.len() >= HISTORY_CAPACITY {
                state.history.pop_front();
            }
            state.history.push_back(ExecutionRecord {
                intent: intent.to_owned(),
                actions: actions.clone(),
                success,
                latency_ms,
                timestamp: Utc::now(),
                context_hash: context_hash.clone(),
            });

            let candidate = state
                .candidates
                .entry(context_hash.clone())
                .or_insert_with(|| SkillCandidate {
                    intent: intent.to_owned(),
                    pattern: context_hash.clone(),
                    actions,
                    success_streak: 0,
                    total_executions: 0,
                    success_count: 0,
                });

            candidate.total_executions = candidate.total_executions.saturating_add(1);
            if success {
                candidate.success_streak = candidate.success_streak.saturating_add(1);
                candidate.success_count = candidate.success_count.saturating_add(1);
            } else {
                candidate.success_streak = 0;
            }

            let thresholds_met = candidate.success_streak >= self.config.promotion_streak
                && candidate.success_rate() >= self.config.promotion_success_rate
                && candidate.total_executions >= self.config.promotion_min_executions;

            thresholds_met.then(|| candidate.clone())
        };

        if let Some(candidate) = promotable {
            self.promote(candidate).await;
        }
    }

    /// Promote a candidate to the skill store; remove it on acceptance.
    async fn promote(&self, candidate: SkillCandidate) {
        let skill = Skill {
            id: None,
            intent: candidate.intent.clone(),
            pattern: candidate.pattern.clone(),
            actions: candidate.actions.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            created_at: Utc::now(),
            last_used: Some(Utc::now()),
            metadata: serde_json::json!({
                "successRate": candidate.success_rate(),
                "executions": candidate.total_executions,
                "streak": candidate.success_streak,
            }),
        };

        match self.memory.skill_promote(&skill).await {
            Ok(()) => {
                info!(
                    intent = %candidate.intent,
                    pattern = %candidate.pattern,
                    executions = candidate.total_executions,
                    "skill promoted"
                );
                let mut state = self.state.lock().await;
                state.candidates.remove(&candidate.pattern);
            }
            Err(e) => {
                let serialized = serde_json::to_string(&candidate)
                    .unwrap_or_else(|_| "<unserializable>".to_owned());
                warn!(
                    error = %e,
                    candidate = %serialized,
                    "skill store refused promotion"
                );
            }
        }
    }

    /// Query the store for a replayable skill matching the intent text.
    ///
    /// Returns the best match that passes every replay filter, or `None`.
    /// Store failures are logged and treated as no match.
    pub async fn find_replay(&self, intent_text: &str) -> Option<SkillMatch> {
        let matches = match self.memory.skill_search(intent_text, 5).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "skill search failed");
                return None;
            }
        };

        matches
            .into_iter()
            .find(|m| match self.replay_rejection(intent_text, m) {
                None => true,
                Some(reason) => {
                    debug!(
                        skill = m.skill.id.as_deref().unwrap_or("<unsaved>"),
                        reason, "skill rejected for replay"
                    );
                    false
                }
            })
    }

    /// Why a stored match must not be replayed, or `None` when usable.
    fn replay_rejection(&self, intent_text: &str, m: &SkillMatch) -> Option<&'static str> {
        if m.skill.actions.is_empty() {
            return Some("stored skill has no actions");
        }
        if matches!(m.stats.status, SkillStatus::Archived | SkillStatus::Demoted) {
            return Some("status excludes replay");
        }
        if m.stats.success_rate < self.config.decay_floor {
            return Some("success rate below decay floor");
        }
        if m.similarity < self.config.replay_similarity {
            return Some("similarity below threshold");
        }
        if !tokens_overlap(intent_text, &m.skill.intent) {
            return Some("no token overlap with stored intent");
        }
        let blacklisted = self.config.domain_blacklist.iter().any(|domain| {
            let d = domain.to_lowercase();
            m.skill.pattern.to_lowercase().contains(&d)
                || m.skill.intent.to_lowercase().contains(&d)
        });
        if blacklisted {
            return Some("domain blacklisted for replay");
        }
        None
    }

    /// One pass of the periodic decay loop.
    ///
    /// Demotes skills below the success floor, archives skills unused for
    /// longer than the configured window, and marks strong active skills
    /// preferred. Store failures are logged per skill and never abort the
    /// sweep. Returns how many status patches were applied.
    pub async fn decay_sweep(&self) -> u32 {
        let skills = match self.memory.skill_list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "decay sweep could not list skills");
                return 0;
            }
        };

        let now = Utc::now();
        let archive_cutoff = Duration::try_days(self.config.archive_after_days)
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(now);
        let mut patched: u32 = 0;

        for m in skills {
            let Some(skill_id) = m.skill.id.as_deref() else {
                continue;
            };

            let new_status = if m.stats.success_rate < self.config.decay_floor {
                Some((SkillStatus::Demoted, "success rate below decay floor"))
            } else if m
                .skill
                .last_used
                .is_some_and(|used| used < archive_cutoff)
            {
                Some((SkillStatus::Archived, "unused past archive window"))
            } else if m.stats.success_rate >= self.config.preferred_rate
                && m.stats.status == SkillStatus::Active
            {
                Some((SkillStatus::Preferred, "sustained high success rate"))
            } else {
                None
            };

            let Some((status, reason)) = new_status else {
                continue;
            };
            if status == m.stats.status {
                continue;
            }

            match self
                .memory
                .skill_set_status(skill_id, status, Some(reason))
                .await
            {
                Ok(()) => {
                    info!(skill = skill_id, ?status, reason, "skill status updated");
                    patched = patched.saturating_add(1);
                }
                Err(e) => warn!(skill = skill_id, error = %e, "skill status patch failed"),
            }
        }

        patched
    }

    /// Current history length (bounded by the ring capacity).
    pub async fn history_len(&self) -> usize {
        self.state.lock().await.history.len()
    }

    /// Current candidate under the given context hash, if any.
    pub async fn candidate(&self, context_hash: &str) -> Option<SkillCandidate> {
        self.state.lock().await.candidates.get(context_hash).cloned()
    }
}

/// True when the two texts share at least one word token, case-insensitive.
fn tokens_overlap(a: &str, b: &str) -> bool {
    let tokens = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    };
    let ta = tokens(a);
    let tb = tokens(b);
    ta.intersection(&tb).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryError;
    use crate::types::UserEntity;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    // ── Mock skill store ──

    #[derive(Default)]
    struct MockStore {
        promoted: StdMutex<Vec<Skill>>,
        patches: StdMutex<Vec<(String, SkillStatus)>>,
        search_results: StdMutex<Vec<SkillMatch>>,
        listing: StdMutex<Vec<SkillMatch>>,
        refuse_promotion: bool,
    }

    #[async_trait]
    impl MemoryApi for MockStore {
        async fn hybrid_search(
            &self,
            _query: &str,
            _limit: u32,
        ) -> Result<Vec<crate::memory::SearchHit>, MemoryError> {
            Ok(Vec::new())
        }

        async fn get_user_entity(&self, _id: &str) -> Result<Option<UserEntity>, MemoryError> {
            Ok(None)
        }

        async fn upsert_user_entity(
            &self,
            _id: &str,
            _traits: &serde_json::Value,
        ) -> Result<(), MemoryError> {
            Ok(())
        }

        async fn skill_search(
            &self,
            _query: &str,
            _limit: u32,
        ) -> Result<Vec<SkillMatch>, MemoryError> {
            Ok(self.search_results.lock().expect("test lock").clone())
        }

        async fn skill_promote(&self, skill: &Skill) -> Result<(), MemoryError> {
            if self.refuse_promotion {
                return Err(MemoryError::Status {
                    status: 422,
                    body: "duplicate pattern".to_owned(),
                });
            }
            self.promoted.lock().expect("test lock").push(skill.clone());
            Ok(())
        }

        async fn skill_set_status(
            &self,
            skill_id: &str,
            status: SkillStatus,
            _reason: Option<&str>,
        ) -> Result<(), MemoryError> {
            self.patches
                .lock()
                .expect("test lock")
                .push((skill_id.to_owned(), status));
            Ok(())
        }

        async fn skill_list(&self) -> Result<Vec<SkillMatch>, MemoryError> {
            Ok(self.listing.lock().expect("test lock").clone())
        }

        async fn reflect_upsert(
            &self,
            _reflection: &crate::memory::Reflection,
        ) -> Result<(), MemoryError> {
            Ok(())
        }
    }

    fn send_action(content: &str) -> SkillAction {
        SkillAction {
            tool: "message.send".to_owned(),
            input: serde_json::json!({ "content": content }),
        }
    }

    fn stored_match(similarity: f64, rate: f64, status: SkillStatus) -> SkillMatch {
        SkillMatch {
            skill: Skill {
                id: Some("s1".to_owned()),
                intent: "greet the channel".to_owned(),
                pattern: "hello".to_owned(),
                actions: vec![send_action("replayed")],
                inputs: Vec::new(),
                outputs: Vec::new(),
                created_at: Utc::now(),
                last_used: Some(Utc::now()),
                metadata: serde_json::Value::Null,
            },
            similarity,
            stats: SkillStats {
                status,
                success_rate: rate,
                executions: 10,
            },
        }
    }

    fn graph_with(store: Arc<MockStore>) -> SkillGraph {
        SkillGraph::new(store, SkillConfig::default())
    }

    #[test]
    fn test_context_hash_is_stable_and_input_sensitive() {
        let a = vec![send_action("hi")];
        let b = vec![send_action("hi")];
        let c = vec![send_action("bye")];

        assert_eq!(
            SkillGraph::context_hash("greet", &a),
            SkillGraph::context_hash("greet", &b)
        );
        assert_ne!(
            SkillGraph::context_hash("greet", &a),
            SkillGraph::context_hash("greet", &c)
        );
        assert_ne!(
            SkillGraph::context_hash("greet", &a),
            SkillGraph::context_hash("farewell", &a)
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let graph = graph_with(Arc::new(MockStore::default()));
        for i in 0..1100u32 {
            graph
                .record_execution(&format!("intent-{i}"), vec![send_action("x")], false, 1)
                .await;
        }
        assert_eq!(graph.history_len().await, HISTORY_CAPACITY);
    }

    #[tokio::test]
    async fn test_failure_resets_streak() {
        let graph = graph_with(Arc::new(MockStore::default()));
        let actions = vec![send_action("hi")];
        let hash = SkillGraph::context_hash("greet", &actions);

        graph
            .record_execution("greet", actions.clone(), true, 5)
            .await;
        graph
            .record_execution("greet", actions.clone(), true, 5)
            .await;
        let candidate = graph.candidate(&hash).await.expect("candidate exists");
        assert_eq!(candidate.success_streak, 2);

        graph.record_execution("greet", actions, false, 5).await;
        let candidate = graph.candidate(&hash).await.expect("candidate exists");
        assert_eq!(candidate.success_streak, 0);
        assert_eq!(candidate.total_executions, 3);
        assert_eq!(candidate.success_count, 2);
    }

    #[tokio::test]
    async fn test_promotion_on_streak() {
        let store = Arc::new(MockStore::default());
        let graph = graph_with(store.clone());
        let actions = vec![send_action("hi")];
        let hash = SkillGraph::context_hash("greet", &actions);

        for _ in 0..3 {
            graph
                .record_execution("greet", actions.clone(), true, 5)
                .await;
        }

        let promoted = store.promoted.lock().expect("test lock");
        assert_eq!(promoted.len(), 1, "three straight successes promote");
        assert_eq!(promoted[0].intent, "greet");
        assert_eq!(promoted[0].pattern, hash);
        drop(promoted);

        // Candidate is deleted after a successful promotion.
        assert!(graph.candidate(&hash).await.is_none());
    }

    #[tokio::test]
    async fn test_refused_promotion_keeps_candidate() {
        let store = Arc::new(MockStore {
            refuse_promotion: true,
            ..MockStore::default()
        });
        let graph = graph_with(store.clone());
        let actions = vec![send_action("hi")];
        let hash = SkillGraph::context_hash("greet", &actions);

        for _ in 0..3 {
            graph
                .record_execution("greet", actions.clone(), true, 5)
                .await;
        }

        assert!(store.promoted.lock().expect("test lock").is_empty());
        assert!(
            graph.candidate(&hash).await.is_some(),
            "candidate survives a store refusal"
        );
    }

    #[tokio::test]
    async fn test_replay_accepts_good_match() {
        let store = Arc::new(MockStore::default());
        *store.search_results.lock().expect("test lock") =
            vec![stored_match(0.91, 0.88, SkillStatus::Active)];
        let graph = graph_with(store);

        let m = graph.find_replay("greet the channel").await;
        assert!(m.is_some());
    }

    #[tokio::test]
    async fn test_replay_rejections() {
        let cases = [
            ("low similarity", stored_match(0.5, 0.9, SkillStatus::Active)),
            (
                "low success rate",
                stored_match(0.95, 0.3, SkillStatus::Active),
            ),
            ("demoted", stored_match(0.95, 0.9, SkillStatus::Demoted)),
            ("archived", stored_match(0.95, 0.9, SkillStatus::Archived)),
        ];

        for (label, m) in cases {
            let store = Arc::new(MockStore::default());
            *store.search_results.lock().expect("test lock") = vec![m];
            let graph = graph_with(store);
            assert!(
                graph.find_replay("greet the channel").await.is_none(),
                "expected rejection: {label}"
            );
        }
    }

    #[tokio::test]
    async fn test_replay_rejects_empty_actions_and_disjoint_tokens() {
        let mut empty = stored_match(0.95, 0.9, SkillStatus::Active);
        empty.skill.actions.clear();

        let store = Arc::new(MockStore::default());
        *store.search_results.lock().expect("test lock") = vec![empty];
        let graph = graph_with(store);
        assert!(graph.find_replay("greet the channel").await.is_none());

        let store = Arc::new(MockStore::default());
        *store.search_results.lock().expect("test lock") =
            vec![stored_match(0.95, 0.9, SkillStatus::Active)];
        let graph = graph_with(store);
        assert!(
            graph.find_replay("completely unrelated words").await.is_none(),
            "no token overlap means no replay"
        );
    }

    #[tokio::test]
    async fn test_replay_respects_domain_blacklist() {
        let mut m = stored_match(0.95, 0.9, SkillStatus::Active);
        m.skill.intent = "weather forecast for the channel".to_owned();

        let store = Arc::new(MockStore::default());
        *store.search_results.lock().expect("test lock") = vec![m];
        let graph = graph_with(store);
        assert!(
            graph.find_replay("weather forecast please").await.is_none(),
            "blacklisted domains take the tool path"
        );
    }

    #[tokio::test]
    async fn test_decay_sweep_transitions() {
        let mut weak = stored_match(0.9, 0.3, SkillStatus::Active);
        weak.skill.id = Some("weak".to_owned());

        let mut stale = stored_match(0.9, 0.7, SkillStatus::Active);
        stale.skill.id = Some("stale".to_owned());
        stale.skill.last_used = Some(Utc::now() - Duration::days(45));

        let mut strong = stored_match(0.9, 0.95, SkillStatus::Active);
        strong.skill.id = Some("strong".to_owned());

        let mut steady = stored_match(0.9, 0.7, SkillStatus::Active);
        steady.skill.id = Some("steady".to_owned());

        let store = Arc::new(MockStore::default());
        *store.listing.lock().expect("test lock") = vec![weak, stale, strong, steady];
        let graph = graph_with(store.clone());

        let patched = graph.decay_sweep().await;
        assert_eq!(patched, 3);

        let patches = store.patches.lock().expect("test lock");
        assert!(patches.contains(&("weak".to_owned(), SkillStatus::Demoted)));
        assert!(patches.contains(&("stale".to_owned(), SkillStatus::Archived)));
        assert!(patches.contains(&("strong".to_owned(), SkillStatus::Preferred)));
        assert!(!patches.iter().any(|(id, _)| id == "steady"));
    }

    #[test]
    fn test_tokens_overlap() {
        assert!(tokens_overlap("greet the channel", "warmly greet everyone"));
        assert!(!tokens_overlap("greet the channel", "forecast tomorrow"));
        assert!(tokens_overlap("Hello!", "hello there"));
    }
}
