//! Prompt templates.
//!
//! Each pipeline stage has a Markdown template with `{name}` placeholders.
//! Templates are read from the configured prompt directory so they can be
//! tuned without rebuilding; the copies in `prompts/` are compiled in as
//! defaults for any file that is absent.

use std::path::PathBuf;
use tracing::{debug, warn};

/// The prompts used by the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Intake check; variables `chat_history`, `user_input`.
    Coordinator,
    /// Fine-Kinney factors; variables `chat_history`, `user_input`, `context`.
    RiskAnalyst,
    /// One-sentence work description; variables `history`, `last_input`.
    WorkSummary,
    /// Permit analysis text; variables `user_input`, `context`.
    AdminAgent,
}

impl Prompt {
    pub const ALL: [Prompt; 4] = [
        Prompt::Coordinator,
        Prompt::RiskAnalyst,
        Prompt::WorkSummary,
        Prompt::AdminAgent,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Prompt::Coordinator => "coordinator.md",
            Prompt::RiskAnalyst => "risk_analyst.md",
            Prompt::WorkSummary => "work_summary.md",
            Prompt::AdminAgent => "admin_agent.md",
        }
    }

    pub fn default_template(&self) -> &'static str {
        match self {
            Prompt::Coordinator => include_str!("../../prompts/coordinator.md"),
            Prompt::RiskAnalyst => include_str!("../../prompts/risk_analyst.md"),
            Prompt::WorkSummary => include_str!("../../prompts/work_summary.md"),
            Prompt::AdminAgent => include_str!("../../prompts/admin_agent.md"),
        }
    }
}

/// Loads templates from disk, falling back to the built-in copies.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Template text for a prompt.
    pub fn template(&self, prompt: Prompt) -> String {
        let Some(ref dir) = self.dir else {
            return prompt.default_template().to_string();
        };

        let path = dir.join(prompt.file_name());
        if !path.exists() {
            debug!("{} not found, using built-in prompt", path.display());
            return prompt.default_template().to_string();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Failed to read prompt {}: {}. Using built-in prompt.",
                    path.display(),
                    e
                );
                prompt.default_template().to_string()
            }
        }
    }

    /// Render a prompt with its variables.
    pub fn render(&self, prompt: Prompt, vars: &[(&str, &str)]) -> String {
        render_template(&self.template(prompt), vars)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitute `{name}` placeholders. `{{` and `}}` produce literal braces;
/// unknown placeholders are kept as written.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail[1..].find('}') {
                let name = &tail[1..1 + end];
                if is_placeholder_name(name) {
                    match vars.iter().find(|(key, _)| *key == name) {
                        Some((_, value)) => out.push_str(value),
                        None => {
                            warn!("Prompt placeholder {{{}}} has no value", name);
                            out.push_str(&tail[..end + 2]);
                        }
                    }
                    rest = &tail[end + 2..];
                    continue;
                }
            }
        }

        // Lone brace
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}
