//! The model backend capability.
//!
//! The engine talks to language models through one narrow seam:
//! [`ModelBackend::generate`]. The production implementation lives in
//! [`crate::client`]; this module defines the trait, the conversation wire
//! types, and two deterministic in-process backends used by tests here and
//! in downstream crates.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Transport and protocol failures from a model backend.
///
/// None of these are retried here; the controller decides whether to skip
/// the generation or give up.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API key environment variable {0} not set")]
    MissingApiKey(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("model returned an empty response")]
    Empty,
}

/// Capability to turn a prompt into text. One call, one completion.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Runs the conversation and returns the model's reply.
    async fn generate(
        &self,
        system_message: &str,
        conversation: &[Message],
    ) -> Result<String, BackendError>;
}

/// Deterministic backend that replays a fixed list of responses in order.
///
/// Once the list is exhausted it keeps returning the last response, so a
/// test can run more generations than it scripted replies for.
pub struct ScriptedBackend {
    responses: Vec<String>,
    next: Mutex<usize>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            next: Mutex::new(0),
        }
    }

    /// How many generate calls have been made.
    pub fn calls(&self) -> usize {
        *self.next.lock().unwrap()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(
        &self,
        _system_message: &str,
        _conversation: &[Message],
    ) -> Result<String, BackendError> {
        let mut next = self.next.lock().unwrap();
        let index = (*next).min(self.responses.len().saturating_sub(1));
        *next += 1;
        match self.responses.get(index) {
            Some(response) => Ok(response.clone()),
            None => Err(BackendError::Empty),
        }
    }
}

/// Backend that always fails, for exercising skip paths.
pub struct FailingBackend;

#[async_trait]
impl ModelBackend for FailingBackend {
    async fn generate(
        &self,
        _system_message: &str,
        _conversation: &[Message],
    ) -> Result<String, BackendError> {
        Err(BackendError::Timeout(0))
    }
}
