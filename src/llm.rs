use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::Retryable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub instructions: String,
    pub input: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("text generation quota exhausted or rate limited: {0}")]
    Quota(String),
    #[error("text generation API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("text generation transport error: {0}")]
    Transport(String),
    #[error("decode text generation response: {0}")]
    Decode(String),
    #[error("text generation returned no output")]
    EmptyOutput,
    #[error("text generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("text generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Quota and rate-limit failures switch the run to the fallback model.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Quota(_) | Self::Decode(_) | Self::EmptyOutput | Self::Cancelled => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError>;
}

/// Replays queued responses in call order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<String, GenerationError>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.respond(Ok(text.to_owned()))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        next.unwrap_or(Err(GenerationError::Api {
            status: 500,
            message: "no scripted response left".to_owned(),
        }))
    }
}

/// Outermost `{...}` span of model output that may wrap JSON in prose or
/// code fences.
pub fn extract_json_object(text: &str) -> anyhow::Result<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("missing `{{`"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("missing `}}`"))?;
    if end <= start {
        anyhow::bail!("invalid json object span");
    }
    Ok(&text[start..=end])
}
