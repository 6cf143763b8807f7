//! aide CLI - command-line host for the aide assistant.

mod cli_args;
mod commands;
mod interactive;
mod status_feed;
mod ui_writer_impl;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use aide_config::Config;
use aide_core::capabilities::{Capabilities, FileMemoryStore, StaticLocation};
use aide_core::{
    AutoTurnScheduler, Conversation, ConversationHandle, ConversationSettings, PerformanceTracker,
};
use aide_providers::{AnthropicProvider, LLMProvider};

pub use cli_args::Cli;

use interactive::{drive_turn, report_turn, run_interactive};
use ui_writer_impl::ConsoleUiWriter;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize_logging(&cli);

    let config = Config::load(cli.config.as_deref())?;
    let handle = build_conversation(&config)?;

    match &cli.prompt {
        Some(prompt) => {
            let cancel = CancellationToken::new();
            let result = drive_turn(handle.try_send(prompt, cancel.clone()), cancel).await;
            report_turn(&handle, result).await;
            Ok(())
        }
        None => {
            let scheduler = if cli.no_auto {
                AutoTurnScheduler::disabled()
            } else {
                AutoTurnScheduler::new(config.engine.quiescence())
            };
            run_interactive(handle, scheduler).await
        }
    }
}

// --- Helper functions ---

fn initialize_logging(cli: &Cli) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if cli.verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for target in ["aide", "aide_cli", "aide_core", "aide_config", "aide_providers"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let provider = AnthropicProvider::new(
        config.provider.api_key.clone(),
        Some(config.provider.model.clone()),
        config.provider.base_url.clone(),
        config.provider.api_version.clone(),
        Some(config.provider.max_tokens),
    )
    .context("Failed to set up the Anthropic provider")?;
    info!("Using {} model {}", provider.name(), provider.model());
    Ok(Arc::new(provider))
}

fn build_capabilities(config: &Config) -> Capabilities {
    let memory = FileMemoryStore::new(config.assistant.memory_path());
    debug!("Memory file: {}", memory.path().display());
    let capabilities = Capabilities::local(Arc::new(memory));
    match &config.assistant.location {
        Some(location) if !location.trim().is_empty() => {
            capabilities.with_location(Arc::new(StaticLocation(location.trim().to_string())))
        }
        _ => capabilities,
    }
}

fn build_conversation(config: &Config) -> Result<ConversationHandle<ConsoleUiWriter>> {
    let provider = build_provider(config)?;
    let tracker = Arc::new(PerformanceTracker::load(config.assistant.stats_path()));
    let conversation = Conversation::new(
        provider,
        build_capabilities(config),
        ConsoleUiWriter::new(),
        ConversationSettings::from_config(config),
        tracker,
    );
    Ok(ConversationHandle::new(conversation))
}
