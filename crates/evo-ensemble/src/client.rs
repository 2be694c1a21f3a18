//! OpenAI-compatible chat-completions backend.
//!
//! Speaks the `/chat/completions` wire protocol so the same backend covers
//! any provider exposing that surface. The API key is resolved from an
//! environment variable named in the configuration, never stored in config
//! files or checkpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, Message, ModelBackend, Role};

/// Connection parameters for one model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Model identifier sent in the request body.
    pub model: String,
    /// Base URL up to but not including `/chat/completions`.
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Request timeout in seconds. Distinct from the evaluation timeout.
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            timeout_secs: 120,
        }
    }
}

impl ConnectionConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        debug_assert!(
            (0.0..=2.0).contains(&temperature),
            "temperature must be between 0.0 and 2.0"
        );
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// HTTP backend over an OpenAI-compatible endpoint.
pub struct HttpBackend {
    config: ConnectionConfig,
    api_key: String,
    client: Client,
}

impl HttpBackend {
    /// Builds a client, resolving the API key from the configured
    /// environment variable.
    pub fn new(config: ConnectionConfig) -> Result<Self, BackendError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| BackendError::MissingApiKey(config.api_key_env.clone()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn generate(
        &self,
        system_message: &str,
        conversation: &[Message],
    ) -> Result<String, BackendError> {
        debug_assert!(!conversation.is_empty(), "conversation cannot be empty");

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if !system_message.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: system_message.to_string(),
            });
        }
        messages.extend(conversation.iter().cloned());

        let request = ApiRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.config.timeout_secs)
                } else {
                    BackendError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| BackendError::Http(e.to_string()))?;
            let body = body.chars().take(500).collect();
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: ApiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let text = data
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(text)
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}
