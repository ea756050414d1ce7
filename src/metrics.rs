//! Fire-and-forget metrics sinks.
//!
//! The registry reports every tool invocation and the observer reports one
//! record per pipeline run. Sinks must be cheap and concurrency-safe; a
//! slow sink must never slow the pipeline down, so implementations should
//! not block.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Receives tool and pipeline timing records.
///
/// Implementations must be `Send + Sync`; they are shared across
/// concurrently running pipelines.
pub trait MetricsSink: Send + Sync {
    /// One tool invocation completed.
    fn record_tool(&self, tool: &str, ms: u64, success: bool);

    /// One full pipeline run completed.
    fn record_pipeline(&self, observation_id: &str, ms: u64, success: bool);
}

/// Default sink: emits debug-level tracing events.
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_tool(&self, tool: &str, ms: u64, success: bool) {
        debug!(tool, ms, success, "tool metric");
    }

    fn record_pipeline(&self, observation_id: &str, ms: u64, success: bool) {
        debug!(observation_id, ms, success, "pipeline metric");
    }
}

/// Counting sink for tests and health introspection.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    tool_calls: AtomicU64,
    tool_failures: AtomicU64,
    pipeline_runs: AtomicU64,
}

impl CountingMetrics {
    /// Total tool invocations observed.
    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    /// Tool invocations that reported failure.
    pub fn tool_failures(&self) -> u64 {
        self.tool_failures.load(Ordering::Relaxed)
    }

    /// Completed pipeline runs.
    pub fn pipeline_runs(&self) -> u64 {
        self.pipeline_runs.load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingMetrics {
    fn record_tool(&self, _tool: &str, _ms: u64, success: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_pipeline(&self, _observation_id: &str, _ms: u64, _success: bool) {
        self.pipeline_runs.fetch_add(1, Ordering::Relaxed);
    }
}
