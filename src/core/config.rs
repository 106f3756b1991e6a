//! Application configuration management
//!
//! This module handles loading and validating configuration from TOML files.
//! All configuration is validated at startup so a misconfigured gateway never
//! starts serving.

use crate::core::provider::ProviderType;
use crate::core::tokenizer::TokenEncoding;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Maximum token limit default
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Minimum token limit default
const DEFAULT_MIN_TOKENS: u32 = 100;

/// Default request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT: u64 = 90;

/// Default server port
const DEFAULT_PORT: u16 = 8082;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub big_model: String,
    pub small_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens_limit: u32,
    #[serde(default = "default_min_tokens")]
    pub min_tokens_limit: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_tokens_limit: default_max_tokens(),
            min_tokens_limit: default_min_tokens(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_min_tokens() -> u32 {
    DEFAULT_MIN_TOKENS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_encoding() -> String {
    "cl100k_base".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub provider: String,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,
    #[serde(default)]
    pub openrouter: Option<OpenRouterConfig>,
    pub models: ModelConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
}

/// Application configuration loaded from TOML files
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend provider type (OpenAI or OpenRouter)
    pub provider: ProviderType,

    /// Backend API key
    pub backend_api_key: String,

    /// Optional key clients must present
    pub anthropic_api_key: Option<String>,

    /// Backend API base URL
    pub backend_base_url: String,

    /// Azure API version (for Azure OpenAI deployments)
    pub azure_api_version: Option<String>,

    /// OpenRouter specific settings
    pub openrouter_site_url: Option<String>,
    pub openrouter_app_name: Option<String>,

    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Logging level
    pub log_level: String,

    /// Maximum tokens limit
    pub max_tokens_limit: u32,

    /// Minimum tokens limit
    pub min_tokens_limit: u32,

    /// Request timeout in seconds
    pub request_timeout: u64,

    /// Vocabulary used for token counting
    pub token_encoding: TokenEncoding,

    /// Model for opus and sonnet requests
    pub big_model: String,

    /// Model for haiku and unrecognized requests
    pub small_model: String,
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The TOML file cannot be read or parsed
    /// - Required configuration values are missing
    /// - Configuration values are invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read configuration file")?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;

        let provider = ProviderType::from_str(&config.provider)
            .context("Invalid provider value. Must be one of: openai, openrouter")?;

        let (
            backend_api_key,
            backend_base_url,
            azure_api_version,
            openrouter_site_url,
            openrouter_app_name,
        ) = match provider {
            ProviderType::OpenAI => {
                let openai_config = config
                    .openai
                    .context("OpenAI configuration missing for OpenAI provider")?;
                (
                    openai_config.api_key,
                    openai_config
                        .base_url
                        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                    openai_config.azure_api_version,
                    None,
                    None,
                )
            }
            ProviderType::OpenRouter => {
                let openrouter_config = config
                    .openrouter
                    .context("OpenRouter configuration missing for OpenRouter provider")?;
                (
                    openrouter_config.api_key,
                    openrouter_config
                        .base_url
                        .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
                    None,
                    openrouter_config.site_url,
                    openrouter_config.app_name,
                )
            }
        };

        let token_encoding = TokenEncoding::from_str(&config.tokens.encoding).with_context(|| {
            format!(
                "Invalid tokens.encoding '{}'. Must be one of: cl100k_base, o200k_base",
                config.tokens.encoding
            )
        })?;

        if config.request.min_tokens_limit > config.request.max_tokens_limit {
            bail!(
                "request.min_tokens_limit ({}) must not exceed request.max_tokens_limit ({})",
                config.request.min_tokens_limit,
                config.request.max_tokens_limit
            );
        }

        if config.models.big_model.trim().is_empty() || config.models.small_model.trim().is_empty()
        {
            bail!("models.big_model and models.small_model must not be empty");
        }

        Ok(Config {
            provider,
            backend_api_key,
            anthropic_api_key: config.anthropic_api_key.filter(|k| !k.is_empty()),
            backend_base_url,
            azure_api_version,
            openrouter_site_url,
            openrouter_app_name,
            host: config.server.host,
            port: config.server.port,
            log_level: config.server.log_level,
            max_tokens_limit: config.request.max_tokens_limit,
            min_tokens_limit: config.request.min_tokens_limit,
            request_timeout: config.request.request_timeout,
            token_encoding,
            big_model: config.models.big_model,
            small_model: config.models.small_model,
        })
    }

    /// Load configuration from environment and config file
    ///
    /// Reads the file named by `CONFIG_PATH`, or config.toml in the current
    /// directory.
    pub fn from_env() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path))
    }

    /// Validate backend API key format based on provider
    ///
    /// For OpenAI: checks that the API key starts with 'sk-' prefix, unless
    /// an Azure deployment is configured
    /// For OpenRouter: checks that key is non-empty
    pub fn validate_api_key(&self) -> bool {
        match self.provider {
            ProviderType::OpenAI if self.azure_api_version.is_some() => {
                !self.backend_api_key.is_empty()
            }
            ProviderType::OpenAI => self.backend_api_key.starts_with("sk-"),
            ProviderType::OpenRouter => !self.backend_api_key.is_empty(),
        }
    }

    /// Validate the key a client presented
    ///
    /// If anthropic_api_key is set, validates that client_api_key matches.
    /// If not set, validation is skipped and returns true.
    pub fn validate_client_api_key(&self, client_api_key: &str) -> bool {
        match &self.anthropic_api_key {
            Some(expected_key) => client_api_key == expected_key,
            None => true,
        }
    }
}
