//! Permit issuance pipeline.
//!
//! This module chains the coordinator, regulation finder, risk analyst and
//! admin stages over a shared LLM client.

pub mod orchestrator;

pub use orchestrator::{
    OutputSettings, PermitPipeline, PipelineEvent, PipelineOutcome, EXIT_ISSUED,
};
