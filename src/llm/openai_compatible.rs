//! OpenAI-compatible chat completions wire (OpenAI, Groq, xAI).

use serde::{Deserialize, Serialize};

use super::sse::{delta_stream, SseEvent};
use super::{DeltaStream, Wire};
use crate::error::ProviderError;
use crate::types::Message;

pub struct OpenAiCompatibleWire {
    vendor: String,
    api_key: Option<String>,
    api_base: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    client: reqwest::Client,
}

// --- API Request Types (OpenAI format) ---

#[derive(Serialize, Debug)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Serialize, Debug)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

// --- Streaming Response Types ---

#[derive(Deserialize, Debug)]
struct StreamResponseChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

// --- Implementation ---

impl OpenAiCompatibleWire {
    pub fn new(
        vendor: impl Into<String>,
        api_key: Option<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            api_key,
            api_base: api_base.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            client,
        }
    }

    pub fn with_sampling(
        mut self,
        max_tokens: Option<u32>,
        temperature: Option<f64>,
        top_p: Option<f64>,
    ) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    fn build_api_request<'a>(&'a self, history: &'a [Message]) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages: history
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            max_completion_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

/// Parse one `data:` payload of a chat completions stream.
pub fn parse_event(_event: &str, data: &str) -> Result<SseEvent, ProviderError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: StreamResponseChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Other(format!("unexpected stream payload: {}", e)))?;

    if let Some(error) = chunk.error {
        let message = match (error.kind, error.message) {
            (Some(kind), Some(message)) => format!("{}: {}", kind, message),
            (None, Some(message)) => message,
            (Some(kind), None) => kind,
            (None, None) => "unknown error".to_string(),
        };
        return Err(ProviderError::classify(None, &message));
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(SseEvent::Delta(text)),
        _ => Ok(SseEvent::Skip),
    }
}

impl Wire for OpenAiCompatibleWire {
    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn open(&self, history: &[Message]) -> Result<DeltaStream, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&self.build_api_request(history));

        delta_stream(request, parse_event)
    }
}
