//! Tool surface: named async operations with declared output schemas.
//!
//! A tool is the only way the pipeline touches the outside world. Every
//! invocation goes through the [`registry::ToolRegistry`], which wraps the
//! call in a [`crate::types::ToolEnvelope`] with timing, output-schema
//! validation, and one retry.
//!
//! Sub-modules:
//! - `registry`:  name → tool table and the envelope wrapper
//! - `schema`:    the JSON-schema-subset validator
//! - `builtin`:   the built-in tool set (message.send, memory.query, …)
//! - `timeparse`: reminder time expressions

pub mod builtin;
pub mod registry;
pub mod schema;
pub mod timeparse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::ToolRegistry;

/// Errors a tool body may return.
///
/// The registry converts these into `ok = false` envelopes; they never
/// escape past the envelope boundary.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A required argument is missing or has the wrong shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The tool ran but its side effect failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    /// The tool hit its own deadline.
    #[error("timeout")]
    Timeout,
}

/// Declared shape of a tool: name, description, and input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Registered tool name (e.g. "message.send").
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input arguments.
    pub input_schema: serde_json::Value,
}

/// A named async operation with a declared output schema.
///
/// Tools whose [`Tool::output_schema`] returns `Value::Null` are refused
/// at invocation time: unknown output shapes are unsafe downstream.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Declared definition (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// JSON Schema the tool's output must satisfy.
    fn output_schema(&self) -> serde_json::Value;

    /// Run the tool with an argument bag.
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}
