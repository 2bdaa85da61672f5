//! Google Gemini `streamGenerateContent` wire.
//!
//! Gemini names the assistant role `model`, wraps text in `parts`, and
//! streams whole `GenerateContentResponse` objects when asked for `alt=sse`.
//! There is no end marker: the reply ends when the server closes the stream.

use serde::{Deserialize, Serialize};

use super::sse::{delta_stream, SseEvent};
use super::{DeltaStream, Wire};
use crate::error::ProviderError;
use crate::types::{Message, Role};

pub struct GeminiWire {
    api_key: Option<String>,
    api_base: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    client: reqwest::Client,
}

// --- API Request Types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    contents: Vec<ApiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct ApiContent<'a> {
    role: &'static str,
    parts: Vec<ApiPart<'a>>,
}

#[derive(Serialize)]
struct ApiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

// --- Stream Response Types ---

#[derive(Deserialize, Debug)]
struct StreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

// --- Implementation ---

impl GeminiWire {
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
            max_tokens: None,
            temperature: None,
            client,
        }
    }

    pub fn with_sampling(mut self, max_tokens: Option<u32>, temperature: Option<f64>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    fn build_api_request<'a>(&self, history: &'a [Message]) -> ApiRequest<'a> {
        let generation_config = if self.max_tokens.is_some() || self.temperature.is_some() {
            Some(GenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            })
        } else {
            None
        };

        ApiRequest {
            contents: history
                .iter()
                .map(|m| ApiContent {
                    role: match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    parts: vec![ApiPart { text: &m.content }],
                })
                .collect(),
            generation_config,
        }
    }
}

/// Parse one streamed `GenerateContentResponse`.
pub fn parse_event(_event: &str, data: &str) -> Result<SseEvent, ProviderError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let response: StreamResponse = serde_json::from_str(data)
        .map_err(|e| ProviderError::Other(format!("unexpected stream payload: {}", e)))?;

    if let Some(error) = response.error {
        return Err(ProviderError::classify(error.code, &error.message));
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        Ok(SseEvent::Skip)
    } else {
        Ok(SseEvent::Delta(text))
    }
}

impl Wire for GeminiWire {
    fn vendor(&self) -> &str {
        "Gemini"
    }

    fn open(&self, history: &[Message]) -> Result<DeltaStream, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base.trim_end_matches('/'),
            self.model
        );

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&self.build_api_request(history));

        delta_stream(request, parse_event)
    }
}
