//! Azure `OpenAI` chat completions
//!
//! The deployment and api-version travel in the URL; the body carries only
//! the ordered message list. Authentication is an Azure AD bearer token
//! supplied by a [`TokenProvider`].

use super::auth::TokenProvider;
use super::types::{ChatRequest, ChatResponse, MessageRole, Usage};
use super::{CompletionError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Azure `OpenAI` deployment reached through its data-plane endpoint
pub struct AzureOpenAIService {
    client: Client,
    tokens: Arc<dyn TokenProvider>,
    url: String,
    deployment: String,
}

impl AzureOpenAIService {
    pub fn new(
        client: Client,
        tokens: Arc<dyn TokenProvider>,
        endpoint: &str,
        deployment: impl Into<String>,
        api_version: &str,
    ) -> Self {
        let deployment = deployment.into();
        let url = completions_url(endpoint, &deployment, api_version);
        Self {
            client,
            tokens,
            url,
            deployment,
        }
    }

    fn translate_request(request: &ChatRequest) -> AzureChatRequest<'_> {
        AzureChatRequest {
            messages: request
                .messages
                .iter()
                .map(|m| AzureMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        }
    }

    /// Only the first choice is read. No choices, or a first choice without
    /// text, is a malformed response.
    fn normalize_response(resp: AzureChatResponse) -> Result<ChatResponse, CompletionError> {
        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompletionError::malformed_response("No choices in response"))?;

        let Some(text) = choice.message.content else {
            let reason = choice.finish_reason.as_deref().unwrap_or("unspecified");
            return Err(CompletionError::malformed_response(format!(
                "First choice has no content (finish_reason: {reason})"
            )));
        };

        Ok(ChatResponse {
            text,
            finish_reason: choice.finish_reason,
            usage,
        })
    }

    /// Classify HTTP error responses
    fn classify_error(status: reqwest::StatusCode, body: &str) -> CompletionError {
        let message = serde_json::from_str::<AzureErrorResponse>(body)
            .map_or_else(|_| body.to_string(), |e| e.error.message);

        match status.as_u16() {
            401 | 403 => CompletionError::auth(format!("Authentication failed: {message}")),
            429 => CompletionError::rate_limit(format!("Rate limit exceeded: {message}")),
            400 => CompletionError::invalid_request(format!("Invalid request: {message}")),
            500..=599 => CompletionError::server_error(format!("Server error: {message}")),
            _ => CompletionError::unknown(format!("HTTP {status}: {message}")),
        }
    }
}

fn completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
        endpoint.trim_end_matches('/')
    )
}

#[async_trait]
impl LlmService for AzureOpenAIService {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        let token = self.tokens.token().await?;
        let body = Self::translate_request(request);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    CompletionError::network(format!("Connection failed: {e}"))
                } else {
                    CompletionError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CompletionError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &text));
        }

        let parsed: AzureChatResponse = serde_json::from_str(&text).map_err(|e| {
            CompletionError::malformed_response(format!("Failed to parse response: {e}"))
        })?;

        Self::normalize_response(parsed)
    }

    fn model_id(&self) -> &str {
        &self.deployment
    }
}

// Azure OpenAI wire types

#[derive(Debug, Serialize)]
struct AzureChatRequest<'a> {
    messages: Vec<AzureMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AzureMessage<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AzureChatResponse {
    #[serde(default)]
    choices: Vec<AzureChoice>,
    #[serde(default)]
    usage: Option<AzureUsage>,
}

#[derive(Debug, Deserialize)]
struct AzureChoice {
    message: AzureResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct AzureUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AzureErrorResponse {
    error: AzureErrorBody,
}

#[derive(Debug, Deserialize)]
struct AzureErrorBody {
    message: String,
}
