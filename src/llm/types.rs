//! Common types for completion requests

use serde::{Deserialize, Serialize};

/// Message role
///
/// Only `System` and `User` are ever produced: replies are printed, not
/// remembered, so there is no assistant turn to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// One entry of the ordered message list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Completion request. Built fresh for every turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// Completion response, reduced to the first choice
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

impl ChatResponse {
    #[cfg(test)]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("stop".to_string()),
            usage: Usage::default(),
        }
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
