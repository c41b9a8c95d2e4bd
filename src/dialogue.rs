//! Dialogue history and reply text cleanup

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Dialogue messages kept after the system prompt
pub const DEFAULT_HISTORY_CAP: usize = 12;

/// Appended to the system prompt when reasoning output is not wanted
pub const NO_THINK_INSTRUCTION: &str = "Respond directly with concise final answers. \
     Do not include chain-of-thought or <think> tags.";

static THINK_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<think>.*?</think>").expect("think block pattern is valid")
});

/// Speaker of a dialogue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub role: Role,
    pub content: String,
}

impl DialogueMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A pinned system message followed by a sliding window of dialogue
///
/// The system message, if any, is always at index 0 and survives trimming.
/// Trimming drops the oldest non-system messages until at most `cap` remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueHistory {
    messages: Vec<DialogueMessage>,
    cap: usize,
}

impl Default for DialogueHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl DialogueHistory {
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap,
        }
    }

    /// Pin a system message at index 0, replacing any existing one
    pub fn pin_system(&mut self, content: impl Into<String>) {
        let message = DialogueMessage::system(content);
        if self.system().is_some() {
            self.messages[0] = message;
        } else {
            self.messages.insert(0, message);
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(DialogueMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(DialogueMessage::assistant(content));
    }

    /// Drop the oldest dialogue messages beyond the cap
    pub fn trim(&mut self) {
        let system_count = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        if system_count <= 1 && self.messages.len() - system_count <= self.cap {
            return;
        }

        let mut system = None;
        let mut dialog = Vec::with_capacity(self.messages.len());
        for message in self.messages.drain(..) {
            if message.role == Role::System {
                system.get_or_insert(message);
            } else {
                dialog.push(message);
            }
        }

        let excess = dialog.len().saturating_sub(self.cap);
        self.messages = system.into_iter().chain(dialog.into_iter().skip(excess)).collect();
    }

    /// The pinned system message
    #[must_use]
    pub fn system(&self) -> Option<&DialogueMessage> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    #[must_use]
    pub fn messages(&self) -> &[DialogueMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

}

/// Remove `<think>…</think>` blocks from user-visible output
#[must_use]
pub fn strip_thinking(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// System prompt adjusted for whether reasoning output is allowed
#[must_use]
pub fn effective_system_prompt(
    system_prompt: Option<&str>,
    enable_thinking: bool,
) -> Option<String> {
    if enable_thinking {
        return system_prompt.map(ToString::to_string);
    }
    Some(match system_prompt {
        Some(prompt) if !prompt.is_empty() => format!("{prompt}\n\n{NO_THINK_INSTRUCTION}"),
        _ => NO_THINK_INSTRUCTION.to_string(),
    })
}
