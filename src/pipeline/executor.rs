//! Plan execution.
//!
//! Runs a gated, sanitized plan step by step. Dispatch is strictly
//! sequential: step *i* starts only after step *i-1* produced its
//! envelope, and the first failing envelope aborts the remainder of the
//! plan. The envelope wrapper in the registry handles trace ids, output
//! validation, the single retry, and metrics.
//!
//! Before dispatch each step's arguments are enriched with observation
//! fields (never overwriting what the planner set), `${path}` placeholders
//! are interpolated, and the per-author content hook is applied.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::tools::ToolRegistry;
use crate::types::{ExecutionResult, Observation, Plan, StepOutput};

/// Executes plans against the tool registry.
pub struct Executor {
    registry: Arc<ToolRegistry>,
    /// Per-author content suffixes (customization hook; usually empty).
    content_suffixes: HashMap<String, String>,
}

impl Executor {
    /// Create an executor over the given registry.
    pub fn new(registry: Arc<ToolRegistry>, content_suffixes: HashMap<String, String>) -> Self {
        Self {
            registry,
            content_suffixes,
        }
    }

    /// Execute a plan against the (sanitized) observation.
    ///
    /// Returns one envelope per attempted step; steps after the first
    /// failure are never dispatched.
    pub async fn execute(&self, plan: &Plan, observation: &Observation) -> ExecutionResult {
        let mut outputs: Vec<StepOutput> = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            let mut args = enrich_args(&step.args, observation);
            args = interpolate_args(args);
            self.apply_content_hook(&step.tool, &mut args, observation);

            debug!(step = index, tool = %step.tool, "dispatching step");
            let envelope = self.registry.invoke(&step.tool, Value::Object(args)).await;
            let ok = envelope.ok;
            outputs.push(StepOutput {
                step: index,
                envelope,
            });

            if !ok {
                warn!(
                    step = index,
                    tool = %step.tool,
                    "step failed, aborting remaining steps"
                );
                break;
            }
        }

        ExecutionResult::from_outputs(outputs)
    }

    /// Append the configured per-author suffix to outbound content.
    fn apply_content_hook(
        &self,
        tool: &str,
        args: &mut Map<String, Value>,
        observation: &Observation,
    ) {
        if tool != "message.send" {
            return;
        }
        let Some(suffix) = self.content_suffixes.get(&observation.author_id) else {
            return;
        };
        if let Some(Value::String(content)) = args.get_mut("content") {
            content.push_str(suffix);
        }
    }
}

/// Merge observation fields into the argument bag without overwriting.
fn enrich_args(args: &Map<String, Value>, observation: &Observation) -> Map<String, Value> {
    let mut enriched = args.clone();

    let mut put = |key: &str, value: Value| {
        enriched.entry(key.to_owned()).or_insert(value);
    };

    put("channelId", observation.channel_id.clone().into());
    put("userId", observation.author_id.clone().into());
    put(
        "username",
        observation
            .author_display_name
            .clone()
            .unwrap_or_else(|| observation.author_id.clone())
            .into(),
    );
    if let Some(guild_id) = &observation.guild_id {
        put("guildId", guild_id.clone().into());
    }
    put("originalContent", observation.content.clone().into());

    enriched
}

/// Substitute `${path}` references inside the argument tree.
///
/// Paths are dot-separated and resolve against the enriched argument
/// root. A path that fails to resolve leaves its placeholder untouched;
/// any structural error falls back to the pre-interpolation arguments.
fn interpolate_args(args: Map<String, Value>) -> Map<String, Value> {
    let root = Value::Object(args.clone());
    let mut interpolated = Value::Object(args.clone());
    match interpolate_value(&mut interpolated, &root, 0) {
        Ok(()) => match interpolated {
            Value::Object(map) => map,
            _ => args,
        },
        Err(e) => {
            warn!(error = %e, "placeholder interpolation failed, using raw args");
            args
        }
    }
}

/// Deepest argument tree the interpolator will walk.
const MAX_INTERPOLATION_DEPTH: usize = 32;

fn interpolate_value(value: &mut Value, root: &Value, depth: usize) -> Result<(), String> {
    if depth > MAX_INTERPOLATION_DEPTH {
        return Err(format!(
            "argument tree deeper than {MAX_INTERPOLATION_DEPTH} levels"
        ));
    }
    match value {
        Value::String(s) => {
            if let Some(replaced) = interpolate_string(s, root) {
                *value = replaced;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                interpolate_value(item, root, depth.saturating_add(1))?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                interpolate_value(v, root, depth.saturating_add(1))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Interpolate one string; `None` means unchanged.
fn interpolate_string(s: &str, root: &Value) -> Option<Value> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("placeholder regex is valid")
    });

    // A string that is exactly one placeholder keeps the referent's type.
    if let Some(caps) = re.captures(s) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole == s {
            let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return resolve_path(root, path).cloned();
        }
    }

    if !re.is_match(s) {
        return None;
    }

    // Embedded placeholders stringify their referents.
    let replaced = re.replace_all(s, |caps: &regex::Captures<'_>| {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match resolve_path(root, path) {
            Some(Value::String(v)) => v.clone(),
            Some(other) => other.to_string(),
            None => caps
                .get(0)
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
        }
    });
    Some(Value::String(replaced.into_owned()))
}

/// Walk a dot-separated path through a JSON tree.
fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
