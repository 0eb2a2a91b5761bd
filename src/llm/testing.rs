//! Mock completion service for tests

use super::types::{ChatRequest, ChatResponse};
use super::{CompletionError, LlmService};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Returns queued responses and records every request
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<ChatResponse, CompletionError>>>,
    model_id: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: ChatResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: CompletionError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
