//! LLM client used as the grammar annotator
//!
//! Supports Claude (Anthropic) and OpenAI APIs.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

/// Cancellation signal shared between a caller and an in-flight request.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

const SYSTEM_PROMPT: &str = "You are a grammar assistant.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM integration is not configured")]
    NotConfigured,
    #[error("unknown LLM provider: {0}")]
    UnknownProvider(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{provider} API error: {status} - {body}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("empty response from {0}")]
    EmptyResponse(&'static str),
    #[error("request cancelled")]
    Cancelled,
}

/// Something that annotates a delimited text with grammar errors
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Send the delimited text and return the raw annotated reply
    async fn annotate(
        &self,
        delimited: &str,
        cancel: Option<&CancellationSignal>,
    ) -> Result<String, LlmError>;
}

/// LLM client for making API requests
pub struct LlmClient {
    client: Client,
    config: Config,
}

// Claude API types
#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    text: String,
}

// OpenAI API types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageResponse,
}

#[derive(Deserialize)]
struct OpenAiMessageResponse {
    content: Option<String>,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration
    pub fn new(config: Config) -> Result<Self, LlmError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.llm.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Check if LLM integration is available
    pub fn is_available(&self) -> bool {
        self.config.is_llm_enabled()
    }

    /// Build the instruction prompt around the delimited text
    fn build_prompt(&self, delimited: &str) -> String {
        format!(
            r#"I will give you a text with each token (word, punctuation, or whitespace) enclosed in delimiters in the following format:
[START:<ID>]token[END]
where <ID> is a unique identifier for that token. Inside a token, "\[" stands for "[" and "\\" stands for "\"; copy these escapes exactly as written.

Analyze the text for grammatical errors. Return the EXACT same text but for tokens with errors, modify the opening delimiter to include error information in the format:
[START:<ID>:ERROR:error_type:suggestion]
For example:
Input: "[START:1]This[END][START:2] [END][START:3]is[END][START:4] [END][START:5]a[END][START:6] [END][START:7]mistake[END]"
Output: "[START:1]This[END][START:2] [END][START:3]is[END][START:4] [END][START:5:ERROR:grammar:should be 'an']a[END][START:6] [END][START:7]mistake[END]"

IMPORTANT:
- Preserve all original delimiters and spacing exactly.
- Only annotate non-whitespace tokens (do not annotate tokens that are purely whitespace).
- Do not use ":" in error_type and do not use "]" in either field.

Text: "{delimited}""#
        )
    }

    /// Call Claude API
    async fn call_claude(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.config.get_api_key().ok_or(LlmError::NotConfigured)?;

        let base_url = self
            .config
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        let request = ClaudeRequest {
            model: self.config.get_model(),
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                provider: "Claude",
                status,
                body,
            });
        }

        let claude_response: ClaudeResponse = response.json().await?;
        claude_response
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or(LlmError::EmptyResponse("Claude"))
    }

    /// Call OpenAI API
    async fn call_openai(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.config.get_api_key().ok_or(LlmError::NotConfigured)?;

        let base_url = self
            .config
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let request = OpenAiRequest {
            model: self.config.get_model(),
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                provider: "OpenAI",
                status,
                body,
            });
        }

        let openai_response: OpenAiResponse = response.json().await?;
        openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse("OpenAI"))
    }
}

#[async_trait]
impl Annotator for LlmClient {
    async fn annotate(
        &self,
        delimited: &str,
        cancel: Option<&CancellationSignal>,
    ) -> Result<String, LlmError> {
        if !self.is_available() {
            return Err(LlmError::NotConfigured);
        }

        let prompt = self.build_prompt(delimited);
        let reply = match self.config.llm.provider.as_str() {
            "claude" => await_or_cancel(self.call_claude(&prompt), cancel).await??,
            "openai" => await_or_cancel(self.call_openai(&prompt), cancel).await??,
            other => return Err(LlmError::UnknownProvider(other.to_string())),
        };

        Ok(reply.trim().to_string())
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|signal| signal.load(Ordering::Acquire))
}

/// Drive `future` to completion unless `cancel` is raised first
pub async fn await_or_cancel<F>(
    future: F,
    cancel: Option<&CancellationSignal>,
) -> Result<F::Output, LlmError>
where
    F: Future,
{
    if cancel.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(LlmError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(LlmError::Cancelled);
            }
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn create_test_config(provider: &str) -> Config {
        Config {
            llm: LlmConfig {
                provider: provider.to_string(),
                api_key: Some("test-key".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_client_creation() {
        let client = LlmClient::new(create_test_config("claude")).unwrap();
        assert!(client.is_available());
    }

    #[test]
    fn test_client_not_available_when_disabled() {
        let mut config = Config::default();
        config.llm.provider = "none".to_string();
        let client = LlmClient::new(config).unwrap();
        assert!(!client.is_available());
    }

    #[test]
    fn test_build_prompt_embeds_delimited_text() {
        let client = LlmClient::new(create_test_config("openai")).unwrap();

        let prompt = client.build_prompt("[START:1]Helo[END]");
        assert!(prompt.contains("Text: \"[START:1]Helo[END]\""));
        assert!(prompt.contains("[START:<ID>:ERROR:error_type:suggestion]"));
        assert!(prompt.contains("purely whitespace"));
    }

    #[tokio::test]
    async fn test_annotate_not_configured() {
        let mut config = Config::default();
        config.llm.provider = "none".to_string();
        let client = LlmClient::new(config).unwrap();

        let result = client.annotate("[START:1]x[END]", None).await;
        assert!(matches!(result, Err(LlmError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_annotate_unknown_provider() {
        let client = LlmClient::new(create_test_config("mystery")).unwrap();

        let result = client.annotate("[START:1]x[END]", None).await;
        assert!(matches!(result, Err(LlmError::UnknownProvider(p)) if p == "mystery"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_or_cancel_stops_pending_future() {
        let signal: CancellationSignal = Arc::new(AtomicBool::new(false));
        let raiser = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            raiser.store(true, Ordering::Release);
        });

        let result = await_or_cancel(std::future::pending::<()>(), Some(&signal)).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }

    #[tokio::test]
    async fn test_await_or_cancel_without_signal() {
        let result = await_or_cancel(async { 7 }, None).await;
        assert_eq!(result.unwrap(), 7);
    }
}
