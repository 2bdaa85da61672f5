//! Provider registry: display name -> adapter.
//!
//! The registry is built once at startup and handed to the controller.
//! Names keep their registration order, which is the order shown to users.

use std::sync::Arc;

use tracing::{debug, warn};

use super::anthropic::AnthropicWire;
use super::gemini::GeminiWire;
use super::openai_compatible::OpenAiCompatibleWire;
use super::{Assistant, LlmProvider};
use crate::config::{AppConfig, ProviderConfig, ProviderKind};

pub struct ProviderRegistry {
    entries: Vec<(String, Arc<dyn LlmProvider>)>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register an adapter under a display name. Re-registering a name
    /// replaces the adapter but keeps its position.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = provider,
            None => self.entries.push((name, provider)),
        }
    }

    /// Build every configured provider. Providers without an API key are
    /// still registered; they report the missing key when used.
    pub fn from_config(config: &AppConfig) -> Self {
        let client = reqwest::Client::new();
        let mut registry = Self::new();
        for provider in &config.providers {
            if provider.api_key().is_none() {
                warn!(
                    model = %provider.name,
                    env = %provider.api_key_env,
                    "no API key configured"
                );
            }
            registry.register(provider.name.clone(), build_provider(provider, client.clone()));
        }
        if registry.is_empty() {
            warn!("no providers configured; every message will fail");
        } else {
            debug!(models = registry.len(), "provider registry ready");
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, provider)| provider.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    /// Display names in registration order.
    pub fn available_models(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Drop every adapter's history for a session.
    pub fn forget_session(&self, session_id: &str) {
        for (_, provider) in &self.entries {
            provider.forget(session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_provider(config: &ProviderConfig, client: reqwest::Client) -> Arc<dyn LlmProvider> {
    let api_key = config.api_key();
    let api_base = config.api_base().to_string();

    match config.kind {
        ProviderKind::Groq | ProviderKind::OpenAi | ProviderKind::XAi => {
            let wire = OpenAiCompatibleWire::new(
                config.kind.vendor(),
                api_key,
                api_base,
                config.model.clone(),
                client,
            )
            .with_sampling(config.max_tokens, config.temperature, config.top_p);
            Arc::new(Assistant::new(wire))
        }
        ProviderKind::Anthropic => {
            let wire = AnthropicWire::new(api_key, api_base, config.model.clone(), client)
                .with_sampling(config.max_tokens, config.temperature);
            Arc::new(Assistant::new(wire))
        }
        ProviderKind::Gemini => {
            let wire = GeminiWire::new(api_key, api_base, config.model.clone(), client)
                .with_sampling(config.max_tokens, config.temperature);
            Arc::new(Assistant::new(wire))
        }
    }
}
