//! The reasoning pipeline.
//!
//! One observation flows strictly in sequence through:
//! retrieval → intent → planning → sanitization → gating → execution →
//! reflection → skill learning. The [`observer::Observer`] owns the
//! sequencing and the per-stage failure defaults; the stage modules own
//! their own degradation.

pub mod executor;
pub mod gating;
pub mod intent;
pub mod observer;
pub mod planner;
pub mod reflector;
pub mod retriever;

pub use observer::{Observer, PipelineReport};
