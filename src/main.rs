mod cli;
mod config;
mod consent;
mod controller;
mod error;
mod llm;
mod session;
mod storage;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{ChatLoop, Cli};
use config::AppConfig;
use controller::ChatController;
use llm::registry::ProviderRegistry;
use storage::{FileStorage, MemoryStorage, Storage};

/// Logs go to stderr so streamed replies on stdout stay readable.
fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "warn,chatdeck=debug",
        _ => "warn,chatdeck=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Open the storage backend chats are saved to.
fn open_storage(cli: &Cli, config: &AppConfig) -> Result<Arc<dyn Storage>> {
    if cli.ephemeral {
        return Ok(Arc::new(MemoryStorage::with_quota(config.storage.quota_bytes)));
    }
    let dir = config.storage_dir()?;
    let storage = FileStorage::new(&dir, config.storage.quota_bytes)
        .with_context(|| format!("Failed to open data directory: {}", dir.display()))?;
    Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Auto-generate config file on first run
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::config_path()?,
    };
    if !config_path.exists() {
        AppConfig::save_default_to(&config_path)?;
        eprintln!("[Config] Created default config: {}", config_path.display());
        eprintln!("[Config] Set API keys there or in the environment.");
    }

    let mut config = AppConfig::load_from(&config_path)?;
    if let Some(model) = &cli.model {
        config.default_model = model.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.dir = Some(dir.clone());
    }

    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let storage = open_storage(&cli, &config)?;
    info!(
        model = %config.default_model,
        ephemeral = cli.ephemeral,
        "starting chatdeck"
    );

    let controller = ChatController::new(registry, storage, config.default_model);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    ChatLoop::new(controller, stdin, std::io::stdout()).run().await
}
