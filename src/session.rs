//! Conversation session.
//!
//! A session is the list of messages exchanged with the user. It is rendered
//! into prompts as chat history so that an answer to a clarifying question is
//! read together with the original request. Sessions can be persisted as JSON
//! between CLI invocations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Placeholder rendered when there is no history yet.
pub const EMPTY_HISTORY: &str = "None";

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
}

/// Ordered message list for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a session file. A missing file yields an empty session.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No session at {}, starting fresh", path.display());
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write session file: {}", path.display()))
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(SessionMessage {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(SessionMessage {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render the history as `role: content` lines.
    pub fn chat_history(&self) -> String {
        if self.messages.is_empty() {
            return EMPTY_HISTORY.to_string();
        }

        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_history() {
        assert_eq!(Session::new().chat_history(), EMPTY_HISTORY);
    }

    #[test]
    fn test_chat_history_order() {
        let mut session = Session::new();
        session.push_user("Welding on tank T-3");
        session.push_assistant("Is the tank purged and gas-tested?");
        session.push_user("Yes, purged with nitrogen");

        assert_eq!(
            session.chat_history(),
            "user: Welding on tank T-3\nassistant: Is the tank purged and gas-tested?\nuser: Yes, purged with nitrogen"
        );
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("session.json");

        let mut session = Session::new();
        session.push_user("Replace pump seal");
        session.save(&path).unwrap();

        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Session::load(&temp_dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
