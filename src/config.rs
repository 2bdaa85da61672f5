//! Configuration management for chatdeck.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::DEFAULT_QUOTA_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Display name of the model selected at startup.
    pub default_model: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the session and consent slots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: usize,
}

fn default_quota_bytes() -> usize {
    DEFAULT_QUOTA_BYTES
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            quota_bytes: default_quota_bytes(),
        }
    }
}

/// Which wire format a provider speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    OpenAi,
    XAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn default_api_base(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::XAi => "https://api.x.ai/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    pub fn vendor(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "Groq",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::XAi => "xAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Gemini => "Gemini",
        }
    }
}

/// One selectable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name shown in the model list, e.g. "GPT 5".
    pub name: String,
    pub kind: ProviderKind,
    /// Vendor model id, e.g. "gpt-5-nano".
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl ProviderConfig {
    fn new(name: &str, kind: ProviderKind, model: &str, api_key_env: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            model: model.to_string(),
            api_base: None,
            api_key: None,
            api_key_env: api_key_env.to_string(),
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_base())
    }

    /// Key from the config file, else from the environment. `None` when neither is set.
    pub fn api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let groq = ProviderConfig {
            max_tokens: Some(8192),
            temperature: Some(0.6),
            top_p: Some(0.95),
            ..ProviderConfig::new(
                "Llama 3.3 (Groq)",
                ProviderKind::Groq,
                "llama-3.3-70b-versatile",
                "GROQ_API_KEY",
            )
        };
        let anthropic = ProviderConfig {
            max_tokens: Some(64000),
            ..ProviderConfig::new(
                "Claude 4.5 Haiku",
                ProviderKind::Anthropic,
                "claude-haiku-4-5-20251001",
                "ANTHROPIC_API_KEY",
            )
        };

        Self {
            default_model: groq.name.clone(),
            storage: StorageConfig::default(),
            providers: vec![
                groq,
                ProviderConfig::new("GPT 5", ProviderKind::OpenAi, "gpt-5-nano", "OPENAI_API_KEY"),
                ProviderConfig::new(
                    "Gemini 2.5",
                    ProviderKind::Gemini,
                    "gemini-2.5-flash",
                    "GEMINI_API_KEY",
                ),
                anthropic,
                ProviderConfig::new("Grok 4", ProviderKind::XAi, "grok-4", "XAI_API_KEY"),
            ],
        }
    }
}

impl AppConfig {
    pub fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".chatdeck"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    /// Load from `path` (defaults when the file is missing), then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(model) = std::env::var("CHATDECK_MODEL") {
            config.default_model = model;
        }
        if let Ok(dir) = std::env::var("CHATDECK_DATA_DIR") {
            config.storage.dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Directory for the storage slots, `~/.chatdeck/data` unless configured.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join("data")),
        }
    }

    pub fn save_default_to(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content =
            toml::to_string_pretty(&Self::default()).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
