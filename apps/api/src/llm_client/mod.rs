/// LLM Client — the single point of entry for all completion calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// The pipeline only sees the narrow `CompletionClient` trait, so tests swap in
/// a fake and the credential is handed over once at construction.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod prompts;
pub mod retry;

#[cfg(test)]
pub mod fake;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all outreach drafts.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified failure of a completion call. Always local to one row.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl GenerationError {
    /// Failures worth another attempt: throttling, timeouts, server-side and
    /// transport errors. Auth and malformed responses will not fix themselves.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::RateLimited(_)
            | GenerationError::Timeout(_)
            | GenerationError::Http(_) => true,
            GenerationError::Api { status, .. } => *status >= 500,
            GenerationError::Authentication(_) | GenerationError::MalformedResponse(_) => false,
        }
    }
}

/// Text-completion oracle used by the row pipeline.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Anthropic Messages API client. One attempt per call; retries and
/// timeouts are the caller's policy.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    api_url: String,
}

impl LlmClient {
    pub fn new(api_key: String, api_url: String) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?,
            api_key,
            api_url,
        })
    }

    /// Makes a raw call to the Messages API, returning the full response object.
    pub async fn call(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<LlmResponse, GenerationError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens,
            temperature,
            system: prompts::PLAIN_TEXT_SYSTEM,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let body = response.text().await.map_err(transport_error)?;
        let llm_response: LlmResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let response = self.call(prompt, max_tokens, temperature).await?;
        response
            .text()
            .map(str::to_string)
            .ok_or_else(|| GenerationError::MalformedResponse("no text content block".to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(CONNECT_TIMEOUT)
    } else if err.is_decode() {
        GenerationError::MalformedResponse(err.to_string())
    } else {
        GenerationError::Http(err.to_string())
    }
}

/// Maps a non-success status and its body to a classified error.
fn classify_status(status: u16, body: String) -> GenerationError {
    let message = serde_json::from_str::<AnthropicError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    match status {
        401 | 403 => GenerationError::Authentication(message),
        429 => GenerationError::RateLimited(message),
        _ => GenerationError::Api { status, message },
    }
}
