//! Blocking chat-completions client for OpenAI-compatible vision models.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ContentBlock, ImageDetail, ResponseFormat, VisionError, VisionModel, VisionRequest};
use crate::config::ClientSettings;

/// Vision client that talks to `<base_url>/chat/completions`.
#[derive(Clone)]
pub struct OpenAiVisionClient {
    client: Client,
    endpoint: String,
    model: String,
    max_attempts: usize,
}

impl OpenAiVisionClient {
    /// Builds a new client from explicit settings.
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        anyhow::ensure!(
            !settings.api_key.trim().is_empty(),
            "missing OpenAI API key"
        );
        anyhow::ensure!(
            !settings.model.trim().is_empty(),
            "missing OpenAI model name"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", settings.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!(
            "{}/chat/completions",
            settings.base_url.trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            model: settings.model.clone(),
            max_attempts: settings.max_attempts.max(1),
        })
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

impl VisionModel for OpenAiVisionClient {
    fn complete(&self, request: &VisionRequest) -> Result<String, VisionError> {
        let body = ChatRequest::new(&self.model, request);
        let mut attempt = 0usize;
        loop {
            let response = self.client.post(&self.endpoint).json(&body).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ChatResponse = resp
                            .json()
                            .map_err(|err| VisionError::Decode(err.to_string()))?;
                        return parsed
                            .choices
                            .into_iter()
                            .find_map(|choice| choice.message.content)
                            .filter(|content| !content.trim().is_empty())
                            .ok_or(VisionError::EmptyResponse);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if self.should_retry(status) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        tracing::warn!(status = status.as_u16(), attempt, "retrying model call");
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(VisionError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if self.is_retryable_error(&err) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        tracing::warn!(attempt, error = %err, "retrying model call");
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(VisionError::Transport(err.to_string()));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, request: &'a VisionRequest) -> Self {
        let content = request.content.iter().map(WireBlock::from).collect();
        let response_format = match &request.format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonSchema { name, schema } => Some(json!({
                "type": "json_schema",
                "json_schema": { "name": name, "strict": true, "schema": schema },
            })),
        };
        Self {
            model,
            messages: [
                ChatMessage::System {
                    content: &request.system,
                },
                ChatMessage::User { content },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage<'a> {
    System { content: &'a str },
    User { content: Vec<WireBlock<'a>> },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImage<'a> },
}

#[derive(Serialize)]
struct WireImage<'a> {
    url: &'a str,
    detail: ImageDetail,
}

impl<'a> From<&'a ContentBlock> for WireBlock<'a> {
    fn from(block: &'a ContentBlock) -> Self {
        match block {
            ContentBlock::Text(text) => WireBlock::Text { text },
            ContentBlock::Image { url, detail } => WireBlock::ImageUrl {
                image_url: WireImage {
                    url,
                    detail: *detail,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
