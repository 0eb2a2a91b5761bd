//! Completion service abstraction
//!
//! The session talks to a [`PromptAssembler`], which talks to an
//! [`LlmService`]. The only real service is Azure `OpenAI`.

pub mod auth;
mod azure;
mod error;
pub mod prompt;
mod types;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod proptests;

pub use azure::AzureOpenAIService;
pub use error::{CompletionError, CompletionErrorKind};
pub use prompt::PromptAssembler;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for completion providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError>;

    /// Get the model (deployment) ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for completion services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    finish_reason = response.finish_reason.as_deref().unwrap_or("none"),
                    "Completion request finished"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "Completion request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
