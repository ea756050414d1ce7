//! Configuration loading and management.
//!
//! Loads runtime configuration from `./vigil.toml` (or `$VIGIL_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level runtime configuration loaded from TOML.
///
/// Path: `./vigil.toml` or `$VIGIL_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Memory service endpoint settings.
    pub memory: MemoryConfig,
    /// Language-model endpoint settings.
    pub llm: LlmConfig,
    /// Agent behaviour settings.
    pub agent: AgentConfig,
    /// Skill graph thresholds.
    pub skills: SkillConfig,
}

/// Memory service (black-box HTTP key-value + hybrid search + skill store).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Base URL of the memory service.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8230".to_owned(),
            timeout_secs: 10,
        }
    }
}

/// Language-model endpoint (chat-completion, black box).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat-completion endpoint.
    pub base_url: String,
    /// Model identifier passed in each request.
    pub model: String,
    /// Bearer token; empty means no auth header.
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_owned(),
            model: "qwen2.5:14b".to_owned(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Agent behaviour knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name the ambient filter looks for (word-bounded) to decide whether
    /// the assistant is being addressed.
    pub address_name: String,
    /// When true, guild messages that never address the assistant are
    /// planned as no-ops. Gateways that pre-filter mentions disable this.
    pub require_address: bool,
    /// When true, the planner returns deterministic canned plans and never
    /// calls the language model.
    pub mock_planner: bool,
    /// Time zone for reminder parsing: `"host"` or a fixed offset like
    /// `"+02:00"`. Ambiguous day references resolve to 09:00 in this zone.
    pub reminder_timezone: String,
    /// Maximum outbound message length; longer content is truncated.
    pub max_message_len: usize,
    /// Per-author outbound content suffixes (customization hook).
    pub content_suffixes: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address_name: "vi".to_owned(),
            require_address: true,
            mock_planner: false,
            reminder_timezone: "host".to_owned(),
            max_message_len: 2000,
            content_suffixes: HashMap::new(),
        }
    }
}

/// Skill promotion, replay, and decay thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillConfig {
    /// Consecutive successes required before promotion.
    pub promotion_streak: u32,
    /// Minimum success rate required before promotion.
    pub promotion_success_rate: f64,
    /// Minimum total executions required before promotion.
    pub promotion_min_executions: u32,
    /// Minimum similarity for a stored skill to be replayed.
    pub replay_similarity: f64,
    /// Skills below this success rate are demoted (and rejected for replay).
    pub decay_floor: f64,
    /// Skills unused longer than this are archived.
    pub archive_after_days: i64,
    /// Active skills at or above this rate are marked preferred.
    pub preferred_rate: f64,
    /// Skill patterns never replayed; these intents take the tool path.
    pub domain_blacklist: Vec<String>,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            promotion_streak: 3,
            promotion_success_rate: 0.8,
            promotion_min_executions: 3,
            replay_similarity: 0.8,
            decay_floor: 0.5,
            archive_after_days: 30,
            preferred_rate: 0.9,
            domain_blacklist: vec!["weather".to_owned()],
        }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$VIGIL_CONFIG_PATH` or `./vigil.toml`.
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: Config =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("VIGIL_CONFIG_PATH") {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from("vigil.toml"),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("VIGIL_MEMORY_URL") {
            self.memory.base_url = v;
        }
        if let Some(v) = env("VIGIL_LLM_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env("VIGIL_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env("VIGIL_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = env("VIGIL_ADDRESS_NAME") {
            self.agent.address_name = v;
        }
        if let Some(v) = env("VIGIL_MOCK_PLANNER") {
            self.agent.mock_planner = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env("VIGIL_REMINDER_TZ") {
            self.agent.reminder_timezone = v;
        }
        if let Some(v) = env("VIGIL_SKILL_SIMILARITY") {
            match v.parse() {
                Ok(n) => self.skills.replay_similarity = n,
                Err(_) => tracing::warn!(
                    var = "VIGIL_SKILL_SIMILARITY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Memory service request timeout.
    pub fn memory_timeout(&self) -> Duration {
        Duration::from_secs(self.memory.timeout_secs)
    }

    /// Language-model request timeout.
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    /// Fixed reminder offset, or `None` when the host zone should be used.
    ///
    /// Invalid offsets are logged and fall back to host time.
    pub fn reminder_offset(&self) -> Option<FixedOffset> {
        let raw = self.agent.reminder_timezone.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("host") {
            return None;
        }
        match parse_fixed_offset(raw) {
            Some(offset) => Some(offset),
            None => {
                tracing::warn!(value = %raw, "invalid reminder_timezone, using host time");
                None
            }
        }
    }
}

/// Parse a `+HH:MM` / `-HH:MM` offset string.
fn parse_fixed_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
        (1i32, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (-1i32, rest)
    } else {
        return None;
    };
    let (hh, mm) = rest.split_once(':')?;
    let hours: i32 = hh.parse().ok()?;
    let minutes: i32 = mm.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    let total_secs = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_mul(sign)?;
    FixedOffset::east_opt(total_secs)
}
