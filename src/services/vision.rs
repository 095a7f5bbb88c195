use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::services::classifier::AdapterError;

const API_VERSION: &str = "2023-06-01";

/// Image in the form the model accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedImage {
    Inline { media_type: String, data: Vec<u8> },
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text(String),
    Image(NormalizedImage),
}

/// System instructions plus one multi-part user turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: Arc<str>,
    pub parts: Vec<MessagePart>,
}

/// External multimodal model. Returns the model's free-form text reply.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<String, AdapterError>;
}

/// Connection settings for [`MessagesApiClient`].
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Client for a Messages-style multimodal chat API.
pub struct MessagesApiClient {
    http: Client,
    settings: ModelSettings,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImageSource<'a> {
    Base64 { media_type: &'a str, data: String },
    Url { url: &'a str },
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesApiClient {
    pub fn new(settings: ModelSettings) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| AdapterError::CallFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, settings })
    }
}

#[async_trait]
impl VisionModel for MessagesApiClient {
    async fn complete(&self, request: &ModelRequest) -> Result<String, AdapterError> {
        let body = build_request_body(&self.settings.model, self.settings.max_tokens, request);

        let response = self
            .http
            .post(&self.settings.api_url)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::CallFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    AdapterError::CallFailed(format!("rate limited by model API: {detail}"))
                }
                _ => AdapterError::CallFailed(format!("model API returned {status}: {detail}")),
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::CallFailed(format!("unreadable model API response: {e}")))?;

        Ok(parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// Wire body for one classification call.
pub fn build_request_body(model: &str, max_tokens: u32, request: &ModelRequest) -> serde_json::Value {
    let content = request
        .parts
        .iter()
        .map(|part| match part {
            MessagePart::Text(text) => ContentBlock::Text { text },
            MessagePart::Image(NormalizedImage::Inline { media_type, data }) => ContentBlock::Image {
                source: ImageSource::Base64 {
                    media_type,
                    data: base64::engine::general_purpose::STANDARD.encode(data),
                },
            },
            MessagePart::Image(NormalizedImage::Url(url)) => ContentBlock::Image {
                source: ImageSource::Url { url },
            },
        })
        .collect();

    let body = MessagesRequest {
        model,
        max_tokens,
        system: &request.system,
        messages: vec![Message {
            role: "user",
            content,
        }],
    };
    serde_json::to_value(body).unwrap_or_default()
}
