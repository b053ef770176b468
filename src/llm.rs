use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::log_debug;

#[derive(Serialize, Clone, Debug)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Serialize, Clone, Debug)]
pub struct ChatOptions {
    pub context_length: u32,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ToolCall {
    pub function: ToolCallFunction,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ChatResponseMessage {
    #[allow(dead_code)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ChatResponse {
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub done: bool,
}

/// Abstraction over the LLM endpoint, analogous to the CLI agent runner's
/// trait — native async-fn-in-trait so a mock and an HTTP client can share
/// call sites without `async_trait`.
pub trait LlmClient: Send + Sync {
    fn chat(
        &self,
        request: ChatRequest,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> impl std::future::Future<Output = Result<ChatResponse, String>> + Send;
}

/// Real implementation backed by an HTTP JSON chat API (spec §6.1): request
/// carries `{model, messages[], tools[]?, stream?, options{context_length}}`;
/// response carries `{message{role, content, tool_calls?}, done}`.
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    max_attempts: u32,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            max_attempts: 4,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<ChatResponse, String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }

            log_debug!("[llm] POST {} (attempt {})", self.endpoint, attempt);
            let send = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send();

            let result = tokio::select! {
                r = send => r,
                _ = cancel.cancelled() => return Err("cancelled".to_string()),
            };

            match result {
                Ok(response) => {
                    return response
                        .json::<ChatResponse>()
                        .await
                        .map_err(|e| format!("malformed chat response: {}", e));
                }
                Err(e) if attempt < self.max_attempts => {
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    log_debug!("[llm] transient error ({}), retrying in {:?}", e, backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err("cancelled".to_string()),
                    }
                }
                Err(e) => {
                    return Err(format!("LLM endpoint error after {} attempt(s): {}", attempt, e))
                }
            }
        }
    }
}

/// Deterministic mock for pipeline/phase tests. Returns queued responses in
/// FIFO order, analogous to the teacher's `MockAgentRunner`.
pub struct MockLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<ChatResponse>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }
}

impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        _request: ChatRequest,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<ChatResponse, String> {
        self.responses
            .lock()
            .map_err(|_| "mock lock poisoned".to_string())?
            .pop_front()
            .ok_or_else(|| "MockLlmClient: no queued responses remain".to_string())
    }
}
