//! Prompt assembly
//!
//! Every request is one system instruction, then the earlier user turns in
//! the order they were said, then the current input. Earlier turns are
//! replayed under the user role because replies are never remembered.

use super::types::{ChatMessage, ChatRequest};
use super::{CompletionError, LlmService};
use std::sync::Arc;

/// Instruction used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Build the ordered message list for one turn.
///
/// Always `history.len() + 2` messages long.
pub fn assemble(instruction: &str, history: &[String], prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(instruction));
    messages.extend(history.iter().map(|text| ChatMessage::user(text.as_str())));
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Turns a prompt and the session history into one completion call
pub struct PromptAssembler {
    service: Arc<dyn LlmService>,
    instruction: String,
}

impl PromptAssembler {
    pub fn new(service: Arc<dyn LlmService>, instruction: impl Into<String>) -> Self {
        Self {
            service,
            instruction: instruction.into(),
        }
    }

    /// Send `prompt` with `history` as context and return the first
    /// choice's text. Failures are returned as-is, never retried.
    pub async fn ask(&self, prompt: &str, history: &[String]) -> Result<String, CompletionError> {
        let request = ChatRequest {
            messages: assemble(&self.instruction, history, prompt),
        };
        tracing::debug!(
            model = %self.service.model_id(),
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self.service.complete(&request).await?;
        Ok(response.text)
    }
}
