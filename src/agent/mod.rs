//! Reply generation
//!
//! The session hands the full dialogue window to a [`ReplyGenerator`] and gets
//! the assistant's text back. [`ChatClient`] speaks the OpenAI-compatible chat
//! completions protocol and can run a small tool loop.

pub mod chat;
pub mod tools;

use async_trait::async_trait;

use crate::Result;
use crate::dialogue::DialogueMessage;

pub use chat::ChatClient;
pub use tools::{CurrentTimeTool, Tool, ToolRegistry};

/// Produces the assistant's reply to a dialogue
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Reply to the dialogue without tools
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn complete(&self, history: &[DialogueMessage]) -> Result<String>;

    /// Reply to the dialogue, letting the model call tools first
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn complete_with_tools(&self, history: &[DialogueMessage]) -> Result<String> {
        self.complete(history).await
    }

    /// Whether [`ReplyGenerator::complete_with_tools`] does anything beyond `complete`
    fn supports_tools(&self) -> bool {
        false
    }
}
