//! Chat completion client for OpenAI-compatible endpoints.

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, info};

use lectern_core::{retry_async, Error, Result, RetryPolicy};

use super::error::{to_lectern_error, OpenAIErrorCode};
use super::types::*;
use crate::config::LlmConfig;

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatPrompt<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: Option<f32>,
    /// Ask the server for a JSON object response.
    pub json: bool,
}

/// HTTP client for the `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    config: LlmConfig,
}

impl ChatClient {
    /// Create a client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "chat_client",
            base_url = %config.base_url,
            plan_model = %config.plan_model,
            gen_model = %config.gen_model,
            "Initializing chat client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables (see [`LlmConfig::from_env`]).
    pub fn from_env() -> Result<Self> {
        Self::new(LlmConfig::from_env())
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }
        if let Some(ref referer) = self.config.http_referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.config.x_title {
            req = req.header("X-Title", title);
        }

        req.header("Content-Type", "application/json")
    }

    /// Single attempt; returns the first choice's message content.
    pub async fn complete(&self, prompt: &ChatPrompt<'_>) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage::system(prompt.system));
        }
        messages.push(ChatMessage::user(prompt.user));

        let request = ChatCompletionRequest {
            model: prompt.model.to_string(),
            messages,
            temperature: prompt.temperature,
            max_tokens: None,
            response_format: prompt.json.then(ResponseFormat::json_object),
            stream: false,
        };

        let start = Instant::now();
        let response = self
            .build_request("/chat/completions")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: OpenAIErrorResponse = response.json().await.unwrap_or(OpenAIErrorResponse {
                error: OpenAIError {
                    message: "Unknown error".to_string(),
                    error_type: "unknown".to_string(),
                    code: None,
                },
            });
            let code = OpenAIErrorCode::from_response(status.as_u16(), &body.error.error_type);
            return Err(to_lectern_error(
                code,
                &format!("{} returned {}: {}", prompt.model, status, body.error.message),
            ));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        debug!(
            subsystem = "inference",
            component = "chat_client",
            op = "complete",
            model = prompt.model,
            response_len = content.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat completion finished"
        );

        if content.trim().is_empty() {
            return Err(Error::Inference(format!(
                "{} returned an empty completion",
                prompt.model
            )));
        }
        Ok(content)
    }

    /// [`complete`](Self::complete) with model-aware backoff on transient errors.
    pub async fn complete_with_retry(&self, prompt: &ChatPrompt<'_>) -> Result<String> {
        let policy =
            RetryPolicy::for_model(prompt.model).with_max_attempts(self.config.max_attempts);
        retry_async(&policy, "chat_completion", |_| self.complete(prompt)).await
    }
}
