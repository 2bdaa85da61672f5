//! Anthropic (Claude) Messages API wire.
//!
//! Key differences from the OpenAI format:
//! - `max_tokens` is required on every request
//! - auth uses `x-api-key` plus an `anthropic-version` header
//! - the stream is a sequence of typed events; text arrives in
//!   `content_block_delta` events carrying a `text_delta`, the reply ends
//!   with `message_stop`, and failures can arrive mid-stream as `error`

use serde::{Deserialize, Serialize};

use super::sse::{delta_stream, SseEvent};
use super::{DeltaStream, Wire};
use crate::error::ProviderError;
use crate::types::Message;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 64000;

pub struct AnthropicWire {
    api_key: Option<String>,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f64>,
    client: reqwest::Client,
}

// --- API Request Types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

// --- Stream Event Types ---

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

// --- Implementation ---

impl AnthropicWire {
    pub fn new(
        api_key: Option<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            api_key,
            api_base: api_base.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            client,
        }
    }

    pub fn with_sampling(mut self, max_tokens: Option<u32>, temperature: Option<f64>) -> Self {
        if let Some(max_tokens) = max_tokens {
            self.max_tokens = max_tokens;
        }
        self.temperature = temperature;
        self
    }

    fn build_api_request<'a>(&'a self, history: &'a [Message]) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: history
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            temperature: self.temperature,
        }
    }
}

/// Parse one Messages API stream event.
pub fn parse_event(_event: &str, data: &str) -> Result<SseEvent, ProviderError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| ProviderError::Other(format!("unexpected stream payload: {}", e)))?;

    match event {
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } if !text.is_empty() => Ok(SseEvent::Delta(text)),
        StreamEvent::MessageStop => Ok(SseEvent::Done),
        StreamEvent::Error { error } => Err(ProviderError::classify(
            None,
            &format!("{}: {}", error.kind, error.message),
        )),
        _ => Ok(SseEvent::Skip),
    }
}

impl Wire for AnthropicWire {
    fn vendor(&self) -> &str {
        "Anthropic"
    }

    fn open(&self, history: &[Message]) -> Result<DeltaStream, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));

        let request = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_api_request(history));

        delta_stream(request, parse_event)
    }
}
