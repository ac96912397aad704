// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! An [`LlmClient`] implementation against Anthropic's Messages API.
//!
//! `cognition` treats the LLM as a stateless request/response collaborator
//! (one `system`/`user` pair in, one response string out), so this client
//! is a thin wrapper around a single `POST /v1/messages` call rather than
//! the full streaming/tool-use/callback machinery a general-purpose chat
//! model binding would need.

use std::time::Duration;

use async_trait::async_trait;
use browserflow::error::{Error, Result};
use browserflow::llm::LlmClient;
use serde::{Deserialize, Serialize};

/// Claude model names recognized by the Messages API.
pub mod models {
    /// Default model used when a `cognition` node doesn't name one.
    pub const CLAUDE_3_5_SONNET: &str = "claude-3-5-sonnet-latest";
    pub const CLAUDE_3_5_HAIKU: &str = "claude-3-5-haiku-latest";
    pub const CLAUDE_SONNET_4: &str = "claude-sonnet-4";
    pub const CLAUDE_OPUS_4: &str = "claude-opus-4";
}

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// An [`LlmClient`] backed by Anthropic's Messages API.
///
/// # Example
///
/// ```no_run
/// use browserflow_anthropic::ChatAnthropic;
///
/// let client = ChatAnthropic::try_new()
///     .unwrap()
///     .with_api_key("sk-ant-...")
///     .with_model("claude-3-5-sonnet-latest");
/// ```
#[derive(Clone)]
pub struct ChatAnthropic {
    api_key: String,
    default_model: String,
    max_tokens: u32,
    api_url: String,
    api_version: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for ChatAnthropic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAnthropic")
            .field("api_key", &"[REDACTED]")
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .field("api_url", &self.api_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl ChatAnthropic {
    /// Builds a client, loading `ANTHROPIC_API_KEY` from the environment if
    /// present. The API key may still be empty; set it with
    /// [`with_api_key`](Self::with_api_key) before issuing requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn try_new() -> Result<Self> {
        let api_key = std::env::var(ANTHROPIC_API_KEY_ENV).unwrap_or_default();
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Collaborator(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            default_model: models::CLAUDE_3_5_SONNET.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            api_url: DEFAULT_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            http_client,
        })
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Sets the model used when a `cognition` node doesn't name one.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sets `max_tokens` (required by the Messages API).
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Overrides the request URL, e.g. to point at a proxy or mock server.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> Error {
        let parsed = serde_json::from_str::<AnthropicErrorEnvelope>(body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.as_str())
            .unwrap_or(body)
            .trim();
        let message = if message.is_empty() { "unknown error" } else { message };
        let error_type = parsed.as_ref().map(|e| e.error.error_type.as_str()).unwrap_or("");
        Error::Collaborator(format!(
            "anthropic request failed ({status}, {error_type}): {message}"
        ))
    }
}

#[async_trait]
impl LlmClient for ChatAnthropic {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        model: Option<&str>,
        temperature: f32,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(Error::Collaborator(
                "ANTHROPIC_API_KEY is not set and no API key was configured".to_string(),
            ));
        }

        let request = AnthropicRequest {
            model: model.unwrap_or(&self.default_model).to_string(),
            max_tokens: self.max_tokens,
            system: system.to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
            temperature,
        };

        let response = self
            .http_client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::Collaborator(format!("failed to parse response: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Unknown => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_returns_concatenated_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "text", "text": "hello "},
                    {"type": "text", "text": "world"}
                ]
            })))
            .mount(&server)
            .await;

        let client = ChatAnthropic::try_new()
            .unwrap()
            .with_api_key("test-key")
            .with_api_url(format!("{}/v1/messages", server.uri()));

        let text = client.chat("system", "user", None, 0.3).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn chat_maps_error_envelope_into_collaborator_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let client = ChatAnthropic::try_new()
            .unwrap()
            .with_api_key("test-key")
            .with_api_url(format!("{}/v1/messages", server.uri()));

        let err = client.chat("system", "user", None, 0.3).await.unwrap_err();
        assert!(matches!(err, Error::Collaborator(_)));
        assert!(err.to_string().contains("slow down"));
    }

    #[tokio::test]
    async fn chat_without_api_key_fails_fast() {
        let client = ChatAnthropic {
            api_key: String::new(),
            ..ChatAnthropic::try_new().unwrap()
        };
        let err = client.chat("system", "user", None, 0.3).await.unwrap_err();
        assert!(matches!(err, Error::Collaborator(_)));
    }
}
