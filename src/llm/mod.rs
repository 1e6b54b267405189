//! LLM service access.
//!
//! This module provides the completion/embedding client and the prompt
//! templates used by the pipeline stages.

pub mod client;
pub mod prompts;

pub use client::{Embedder, LlmClient, LlmError, OllamaClient, OllamaConfig};
pub use prompts::{Prompt, PromptLibrary};
