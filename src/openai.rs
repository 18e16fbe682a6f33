use anyhow::Context as _;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::retry::{RetryPolicy, retry};

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
}

impl OpenAiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url = std::env::var("PAGEDIGEST_OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_owned());
        Ok(Self { base_url, api_key })
    }
}

/// Text generation over the OpenAI Responses API. Every call goes through
/// the retry wrapper with the configured policy.
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    policy: RetryPolicy,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pagedigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: responses_endpoint(&config.base_url),
            api_key: config.api_key,
            policy,
        })
    }

    async fn responses_text(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "instructions": request.instructions,
            "input": request.input,
            "max_output_tokens": request.max_tokens,
            "text": { "format": { "type": "text" } },
            "store": false,
        });

        // NOTE: Some GPT-5 models reject sampling params like `temperature`.
        if !request.model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert(
                "temperature".to_owned(),
                serde_json::json!(request.temperature),
            );
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerationError::Transport(format!("POST {}: {err}", self.endpoint)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| GenerationError::Transport(format!("read OpenAI response body: {err}")))?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &raw));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| GenerationError::Decode(format!("parse OpenAI response: {err}")))?;
        extract_output_text(&value)
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        tracing::debug!(
            model = %request.model,
            input_chars = request.input.chars().count(),
            max_tokens = request.max_tokens,
            "openai request"
        );
        retry(&self.policy, cancel, "openai responses", || {
            self.responses_text(request)
        })
        .await
    }
}

fn classify_error(status: u16, raw: &str) -> GenerationError {
    let (message, code) = parse_error(raw);
    let message = message.unwrap_or_else(|| raw.to_owned());
    if status == 429 || code.as_deref() == Some("insufficient_quota") {
        return GenerationError::Quota(message);
    }
    GenerationError::Api { status, message }
}

fn parse_error(raw_json: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw_json) else {
        return (None, None);
    };
    let Some(error) = value.get("error") else {
        return (None, None);
    };
    let field = |name: &str| error.get(name).and_then(|v| v.as_str()).map(str::to_owned);
    (field("message"), field("code").or_else(|| field("type")))
}

fn extract_output_text(value: &serde_json::Value) -> Result<String, GenerationError> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GenerationError::Decode("missing `output` array in response".to_owned()))?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            let Some(part_text) = part.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            text.push_str(part_text);
        }
    }

    if text.trim().is_empty() {
        return Err(GenerationError::EmptyOutput);
    }
    Ok(text)
}
