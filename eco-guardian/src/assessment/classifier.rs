//! Text-classification service client.
//!
//! The engine talks to the service through [`PolicyClassifier`] so tests can
//! script responses in-process. [`OpenAiClassifier`] speaks the OpenAI chat
//! completions protocol and works with any compatible endpoint.

use async_trait::async_trait;
use eco_common::config::ClassifierConfig;
use eco_common::util::{sanitize_for_log, truncate_with_ellipsis};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Classifier Trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One outbound classification call.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub messages: Vec<ChatMessage>,
    /// Stable across transport retries of the same call
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct ClassificationResponse {
    /// Raw assistant content, expected to be a JSON object
    pub content: String,
    /// Model that actually answered
    pub model: String,
    pub latency_ms: u64,
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response payload: {0}")]
    InvalidPayload(String),

    #[error("client setup failed: {0}")]
    Setup(String),
}

impl ClassifierError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidPayload(_) | Self::Setup(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(sanitize_for_log(&e.to_string()))
        }
    }
}

/// A service that turns a conversation into a classification response.
#[async_trait]
pub trait PolicyClassifier: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Model identifier requested.
    fn model(&self) -> &str;

    /// Perform exactly one outbound call.
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifierError>;
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// Chat-completions client with JSON response mode.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_output_tokens: u32,
}

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| ClassifierError::Setup("API key is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClassifierError::Setup(sanitize_for_log(&e.to_string())))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl PolicyClassifier for OpenAiClassifier {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifierError> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);

        let body = OpenAIRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(url = %url, messages = request.messages.len(), "Sending classification request");

        let response = self
            .client
            .post(&url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Http {
                status: status.as_u16(),
                body: truncate_with_ellipsis(&sanitize_for_log(&text), 500),
            });
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidPayload(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifierError::InvalidPayload("response has no choices".into()))?;

        Ok(ClassificationResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
