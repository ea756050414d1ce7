//! Tool registry and invocation envelope.
//!
//! The registry is a process-wide table from tool name to implementation,
//! read-only after init. Every invocation is wrapped: a fresh trace id,
//! wall-clock timing, output-schema validation with one retry, and a
//! metrics notification. Tool failures never escape as errors; they
//! become `ok = false` envelopes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::metrics::MetricsSink;
use crate::types::{EnvelopeMeta, ToolEnvelope};

use super::{schema, Tool, ToolDefinition};

/// Process-wide tool table with the envelope wrapper.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    metrics: Arc<dyn MetricsSink>,
    trace_counter: AtomicU64,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry reporting to the given metrics sink.
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            tools: HashMap::new(),
            metrics,
            trace_counter: AtomicU64::new(0),
        }
    }

    /// Register a tool under its declared name.
    ///
    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        debug!(tool = %name, "registering tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// True when a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declared definitions for every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Generate a fresh trace id: millis in base36 plus a process counter.
    pub fn next_trace_id(&self) -> String {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let count = self.trace_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{count}", to_base36(millis))
    }

    /// Invoke a tool, producing exactly one envelope.
    ///
    /// The wrap:
    /// 1. Fresh trace id, start time recorded.
    /// 2. Unknown tool or a tool with no output schema yields an
    ///    `ok = false` envelope without running anything.
    /// 3. The tool runs; a returned error becomes `ok = false`.
    /// 4. On success, `ok` is read from the result's `ok` field
    ///    (absent means true) and the output is validated against the
    ///    tool's schema. A validation failure triggers exactly one
    ///    re-execution; a second failure yields `ok = false` with the
    ///    validator message.
    /// 5. The metrics sink is notified once per envelope.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> ToolEnvelope {
        let trace_id = self.next_trace_id();
        let started = Instant::now();

        let Some(tool) = self.get(name) else {
            let envelope = self.failure_envelope(
                &trace_id,
                name,
                &args,
                format!("unknown tool: {name}"),
                started,
            );
            return envelope;
        };

        let output_schema = tool.output_schema();
        if output_schema.is_null() {
            let envelope = self.failure_envelope(
                &trace_id,
                name,
                &args,
                format!("tool {name} declares no output schema"),
                started,
            );
            return envelope;
        }

        let mut attempt: u32 = 0;
        let envelope = loop {
            attempt = attempt.saturating_add(1);

            match tool.call(args.clone()).await {
                Ok(output) => {
                    if let Err(msg) = schema::validate(&output, &output_schema) {
                        if attempt == 1 {
                            warn!(
                                tool = name,
                                trace_id = %trace_id,
                                error = %msg,
                                "tool output failed validation, retrying once"
                            );
                            continue;
                        }
                        break self.failure_envelope(
                            &trace_id,
                            name,
                            &args,
                            format!("Validation failed: {msg}"),
                            started,
                        );
                    }

                    // `ok` from the result is authoritative; absent means true.
                    let ok = output
                        .get("ok")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(true);
                    let ms = elapsed_ms(started);
                    self.metrics.record_tool(name, ms, ok);
                    break ToolEnvelope {
                        trace_id: trace_id.clone(),
                        tool: name.to_owned(),
                        ok,
                        error: None,
                        ms,
                        input: args.clone(),
                        output,
                        meta: Some(EnvelopeMeta {
                            tool: name.to_owned(),
                            ms,
                            trace_id: trace_id.clone(),
                            ts: Utc::now(),
                        }),
                    };
                }
                Err(e) => {
                    break self.failure_envelope(&trace_id, name, &args, e.to_string(), started);
                }
            }
        };

        envelope
    }

    /// Build an `ok = false` envelope and notify metrics.
    fn failure_envelope(
        &self,
        trace_id: &str,
        tool: &str,
        args: &serde_json::Value,
        error: String,
        started: Instant,
    ) -> ToolEnvelope {
        let ms = elapsed_ms(started);
        warn!(tool, trace_id, error = %error, "tool invocation failed");
        self.metrics.record_tool(tool, ms, false);
        ToolEnvelope {
            trace_id: trace_id.to_owned(),
            tool: tool.to_owned(),
            ok: false,
            error: Some(error),
            ms,
            input: args.clone(),
            output: serde_json::Value::Null,
            meta: Some(EnvelopeMeta {
                tool: tool.to_owned(),
                ms,
                trace_id: trace_id.to_owned(),
                ts: Utc::now(),
            }),
        }
    }
}

/// Elapsed wall-clock milliseconds since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Render an unsigned integer in base36.
fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut buf = Vec::new();
    while n > 0 {
        let idx = usize::try_from(n.checked_rem(36).unwrap_or(0)).unwrap_or(0);
        buf.push(DIGITS[idx]);
        n = n.checked_div(36).unwrap_or(0);
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}
