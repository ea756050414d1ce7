//! Vigil — an autonomous agent runtime.
//!
//! Turns an inbound chat observation into an action plan, executes the
//! plan against a registry of schema-validated tools, and reflects the
//! outcome into long-term memory so repeated patterns can be promoted
//! into replayable skills.

#![allow(missing_docs)] // TODO: enforce once the wire types settle

pub mod config;
pub mod emotion;
pub mod identity;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod skills;
pub mod tools;
pub mod types;
