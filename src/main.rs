//! Claude dialect gateway
//!
//! This application accepts Claude Messages API requests and serves them
//! from an OpenAI-compatible chat completions backend, converting requests,
//! responses, streams and errors between the two formats.

mod api;
mod conversion;
mod core;
mod models;

use crate::api::endpoints::{AppState, create_router};
use crate::core::config::Config;
use crate::core::logging::init_logging;
use crate::core::model_manager::ModelManager;
use crate::core::provider::{Provider, ProviderType};
use crate::core::providers::{OpenAIProvider, OpenRouterProvider};
use crate::core::tokenizer::TiktokenCounter;
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--help") {
        print_help();
        return;
    }

    dotenv::dotenv().ok();

    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Arc<Config>) -> Result<()> {
    print_startup_banner(&config);

    if !config.validate_api_key() {
        bail!(
            "Invalid API key configuration for provider: {:?}",
            config.provider
        );
    }

    let provider: Arc<dyn Provider> = match config.provider {
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(
            config.backend_api_key.clone(),
            config.backend_base_url.clone(),
            config.request_timeout,
            config.azure_api_version.clone(),
        )?),
        ProviderType::OpenRouter => Arc::new(OpenRouterProvider::new(
            config.backend_api_key.clone(),
            Some(config.backend_base_url.clone()),
            config.request_timeout,
            config.openrouter_site_url.clone(),
            config.openrouter_app_name.clone(),
        )?),
    };
    info!("Using provider: {}", provider.provider_name());

    let shutdown = CancellationToken::new();
    let app_state = AppState {
        config: config.clone(),
        model_manager: Arc::new(ModelManager::new(
            config.big_model.clone(),
            config.small_model.clone(),
        )),
        provider,
        token_counter: Arc::new(TiktokenCounter::new(config.token_encoding)),
        shutdown: shutdown.clone(),
    };

    let app = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, cancelling every in-flight stream first
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, closing open streams");
    shutdown.cancel();
}

/// Print startup banner with configuration
fn print_startup_banner(config: &Config) {
    println!("Claude dialect gateway v{}", env!("CARGO_PKG_VERSION"));
    println!("Configuration loaded successfully");
    println!("   Provider: {:?}", config.provider);
    println!("   Base URL: {}", config.backend_base_url);
    println!("   Big Model (opus, sonnet): {}", config.big_model);
    println!("   Small Model (haiku, other): {}", config.small_model);
    println!(
        "   Token Limits: {}..={}",
        config.min_tokens_limit, config.max_tokens_limit
    );
    println!("   Request Timeout: {}s", config.request_timeout);
    println!("   Token Encoding: {:?}", config.token_encoding);
    println!("   Server: {}:{}", config.host, config.port);
    println!(
        "   Client API Key Validation: {}",
        if config.anthropic_api_key.is_some() {
            "Enabled"
        } else {
            "Disabled"
        }
    );
    println!();
}

/// Print help message
fn print_help() {
    println!("Claude dialect gateway v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: dialect-gateway [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --help    Display this help message");
    println!();
    println!("Environment variables:");
    println!("  CONFIG_PATH - Path to the TOML configuration file (default: config.toml)");
    println!("  RUST_LOG    - Tracing filter, overrides [server] log_level");
    println!();
    println!("Configuration file:");
    println!("  provider = \"openai\" | \"openrouter\"");
    println!("  anthropic_api_key - Key clients must present (optional)");
    println!("  [openai]     api_key, base_url, azure_api_version");
    println!("  [openrouter] api_key, base_url, site_url, app_name");
    println!("  [models]     big_model, small_model");
    println!("  [server]     host (0.0.0.0), port (8082), log_level (info)");
    println!("  [request]    max_tokens_limit (4096), min_tokens_limit (100), request_timeout (90)");
    println!("  [tokens]     encoding (cl100k_base | o200k_base)");
    println!();
    println!("Model mapping:");
    println!("  Claude opus and sonnet models -> big_model");
    println!("  Claude haiku models           -> small_model");
    println!("  Anything else                 -> small_model (with a warning)");
}
