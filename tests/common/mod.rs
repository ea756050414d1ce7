//! Shared fakes and builders for the integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use vigil::config::{AgentConfig, SkillConfig};
use vigil::llm::{LlmError, LlmProvider};
use vigil::memory::{MemoryApi, MemoryError, Reflection, SearchHit};
use vigil::metrics::CountingMetrics;
use vigil::pipeline::executor::Executor;
use vigil::pipeline::intent::IntentEngine;
use vigil::pipeline::planner::Planner;
use vigil::pipeline::reflector::Reflector;
use vigil::pipeline::retriever::Retriever;
use vigil::pipeline::Observer;
use vigil::skills::{Skill, SkillGraph, SkillMatch, SkillStatus};
use vigil::tools::builtin::{
    register_builtins, BuiltinDeps, GuildInfo, OutboundMessage, ReminderRequest,
};
use vigil::tools::{ToolError, ToolRegistry};
use vigil::types::{Observation, UserEntity};

// ── Fake memory service ──

/// In-memory stand-in for the memory service.
#[derive(Default)]
pub struct FakeMemory {
    pub entities: Mutex<HashMap<String, UserEntity>>,
    pub reflections: Mutex<Vec<Reflection>>,
    pub hits: Mutex<Vec<SearchHit>>,
    pub skill_matches: Mutex<Vec<SkillMatch>>,
    pub promoted: Mutex<Vec<Skill>>,
    pub fail_everything: AtomicBool,
    pub fail_reflect: AtomicBool,
}

impl FakeMemory {
    fn down(&self) -> Result<(), MemoryError> {
        if self.fail_everything.load(Ordering::SeqCst) {
            Err(MemoryError::Request("service down".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MemoryApi for FakeMemory {
    async fn hybrid_search(
        &self,
        _query: &str,
        _limit: u32,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        self.down()?;
        Ok(self.hits.lock().expect("test lock").clone())
    }

    async fn get_user_entity(&self, id: &str) -> Result<Option<UserEntity>, MemoryError> {
        self.down()?;
        Ok(self.entities.lock().expect("test lock").get(id).cloned())
    }

    async fn upsert_user_entity(
        &self,
        id: &str,
        traits: &serde_json::Value,
    ) -> Result<(), MemoryError> {
        self.down()?;
        let mut entities = self.entities.lock().expect("test lock");
        let entry = entities.entry(id.to_owned()).or_insert_with(|| UserEntity {
            id: id.to_owned(),
            aliases: Vec::new(),
            traits: serde_json::Value::Null,
            display: None,
        });
        entry.traits = traits.clone();
        Ok(())
    }

    async fn skill_search(
        &self,
        _query: &str,
        _limit: u32,
    ) -> Result<Vec<SkillMatch>, MemoryError> {
        self.down()?;
        Ok(self.skill_matches.lock().expect("test lock").clone())
    }

    async fn skill_promote(&self, skill: &Skill) -> Result<(), MemoryError> {
        self.down()?;
        self.promoted.lock().expect("test lock").push(skill.clone());
        Ok(())
    }

    async fn skill_set_status(
        &self,
        _skill_id: &str,
        _status: SkillStatus,
        _reason: Option<&str>,
    ) -> Result<(), MemoryError> {
        self.down()
    }

    async fn skill_list(&self) -> Result<Vec<SkillMatch>, MemoryError> {
        self.down()?;
        Ok(Vec::new())
    }

    async fn reflect_upsert(&self, reflection: &Reflection) -> Result<(), MemoryError> {
        self.down()?;
        if self.fail_reflect.load(Ordering::SeqCst) {
            return Err(MemoryError::Status {
                status: 503,
                body: "reflections down".to_owned(),
            });
        }
        self.reflections
            .lock()
            .expect("test lock")
            .push(reflection.clone());
        Ok(())
    }
}

// ── Scripted language model ──

/// Pops one scripted response per call; errors when the script runs dry.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| (*s).to_owned()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many completions were requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("test lock")
            .pop_front()
            .ok_or(LlmError::EmptyCompletion)
    }
}

// ── Guild info fake ──

pub struct FixedGuildInfo;

#[async_trait]
impl GuildInfo for FixedGuildInfo {
    async fn member_count(&self, _guild_id: &str) -> Result<u64, ToolError> {
        Ok(128)
    }

    async fn moderation_stats(
        &self,
        _guild_id: &str,
        window_hours: u64,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({ "warnings": 2, "windowHours": window_hours }))
    }
}

// ── Harness ──

/// A fully wired observer plus handles onto every fake.
pub struct Harness {
    pub observer: Observer,
    pub memory: Arc<FakeMemory>,
    pub llm: Arc<ScriptedLlm>,
    pub skills: Arc<SkillGraph>,
    pub metrics: Arc<CountingMetrics>,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
    pub reminder_rx: mpsc::Receiver<ReminderRequest>,
}

/// Build a harness with scripted model responses and a default config
/// whose ambient filter is off (tests address the assistant implicitly).
pub fn harness(llm_responses: &[&str]) -> Harness {
    harness_with(llm_responses, |config| {
        config.require_address = false;
    })
}

/// Build a harness, letting the caller tweak the agent config.
pub fn harness_with(
    llm_responses: &[&str],
    configure: impl FnOnce(&mut AgentConfig),
) -> Harness {
    let memory = Arc::new(FakeMemory::default());
    let llm = Arc::new(ScriptedLlm::new(llm_responses));
    let metrics = Arc::new(CountingMetrics::default());

    let mut agent_config = AgentConfig::default();
    configure(&mut agent_config);

    let (outbound_tx, outbound_rx) = mpsc::channel(16);
    let (reminder_tx, reminder_rx) = mpsc::channel(16);

    let mut registry = ToolRegistry::new(metrics.clone());
    register_builtins(
        &mut registry,
        BuiltinDeps {
            outbound_tx,
            reminder_tx,
            memory: memory.clone(),
            guild_info: Arc::new(FixedGuildInfo),
            max_message_len: agent_config.max_message_len,
            reminder_offset: None,
        },
    );
    let registry = Arc::new(registry);

    let skills = Arc::new(SkillGraph::new(memory.clone(), SkillConfig::default()));

    let observer = Observer::new(
        Retriever::new(memory.clone()),
        IntentEngine::new(skills.clone()),
        Planner::new(
            llm.clone(),
            memory.clone(),
            registry.definitions(),
            agent_config.clone(),
        ),
        Executor::new(registry, agent_config.content_suffixes.clone()),
        Reflector::new(memory.clone()),
        skills.clone(),
        metrics.clone(),
    );

    Harness {
        observer,
        memory,
        llm,
        skills,
        metrics,
        outbound_rx,
        reminder_rx,
    }
}

// ── Builders ──

/// An observation; `guild` of `None` means a direct message.
pub fn observation(content: &str, guild: Option<&str>, display: Option<&str>) -> Observation {
    Observation {
        id: "obs-1".to_owned(),
        kind: "message".to_owned(),
        content: content.to_owned(),
        author_id: "u1".to_owned(),
        channel_id: "c1".to_owned(),
        guild_id: guild.map(ToOwned::to_owned),
        timestamp: Utc::now(),
        author_display_name: display.map(ToOwned::to_owned),
    }
}

/// Store an entity with identity traits under `user:u1`.
pub fn seed_identity(
    memory: &FakeMemory,
    public: &[&str],
    private: &[&str],
    allow_auto_intimate: bool,
) {
    let entity = UserEntity {
        id: "user:u1".to_owned(),
        aliases: Vec::new(),
        traits: serde_json::json!({
            "identity": {
                "publicAliases": public,
                "privateAliases": private,
                "allowAutoIntimate": allow_auto_intimate,
            }
        }),
        display: None,
    };
    memory
        .entities
        .lock()
        .expect("test lock")
        .insert("user:u1".to_owned(), entity);
}

/// A plan JSON string with one message.send step.
pub fn message_plan_json(channel: &str, content: &str) -> String {
    serde_json::json!({
        "steps": [{
            "tool": "message.send",
            "args": { "channelId": channel, "content": content },
            "reason": "reply"
        }],
        "reasoning": "reply to the user"
    })
    .to_string()
}
