//! OpenRouter provider implementation
//!
//! OpenRouter fronts many upstream vendors. Its error bodies carry the
//! vendor's name and raw payload under `error.metadata`, which the error
//! mapper surfaces as provider details.

use crate::core::provider::{
    FragmentStream, Provider, ProviderError, fragment_stream, reject_in_band_error,
};
use crate::models::openai::{OpenAIChatCompletionRequest, OpenAIChatCompletionResponse};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter provider
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    site_url: Option<String>,
    app_name: Option<String>,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenRouter API key
    /// * `base_url` - OpenRouter API base URL (default: https://openrouter.ai/api/v1)
    /// * `timeout` - Request timeout in seconds
    /// * `site_url` - Optional site URL for OpenRouter credits
    /// * `app_name` - Optional application name
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        timeout: u64,
        site_url: Option<String>,
        app_name: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            site_url,
            app_name,
        })
    }

    /// Classify OpenRouter errors and provide helpful messages
    fn classify_error(error_detail: &str) -> String {
        let error_lower = error_detail.to_lowercase();

        if error_lower.contains("invalid") && error_lower.contains("api") {
            return "Invalid API key. Please check the [openrouter] api_key configuration."
                .to_string();
        }

        if error_lower.contains("insufficient") && error_lower.contains("credits") {
            return "Insufficient credits. Please add credits to your OpenRouter account."
                .to_string();
        }

        if error_lower.contains("rate_limit") || error_lower.contains("rate-limited") {
            return "Rate limit exceeded. Please wait and try again.".to_string();
        }

        if error_lower.contains("model")
            && (error_lower.contains("not found") || error_lower.contains("does not exist"))
        {
            return "Model not found. Please check the [models] configuration.".to_string();
        }

        error_detail.to_string()
    }

    async fn send(
        &self,
        request: &OpenAIChatCompletionRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        info!(
            "Sending request to OpenRouter: model={}, messages={}, max_tokens={:?}, stream={}",
            request.model,
            request.messages.len(),
            request.max_tokens,
            request.stream
        );

        let mut req_builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key);

        if let Some(ref site_url) = self.site_url {
            req_builder = req_builder.header("HTTP-Referer", site_url);
        }
        if let Some(ref app_name) = self.app_name {
            req_builder = req_builder.header("X-Title", app_name);
        }

        let response = req_builder.json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("OpenRouter returned {}: {}", status, error_text);
            return Err(ProviderError::from_status(
                status.as_u16(),
                &error_text,
                Self::classify_error,
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    async fn create_chat_completion(
        &self,
        request: &OpenAIChatCompletionRequest,
    ) -> Result<OpenAIChatCompletionResponse, ProviderError> {
        let completion: OpenAIChatCompletionResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Unexpected(format!("Failed to parse response: {}", e)))?;
        let completion = reject_in_band_error(completion)?;

        if let Some(ref usage) = completion.usage {
            info!(
                "OpenRouter response: model={}, sent_tokens={}, received_tokens={}, total_tokens={}",
                completion.model, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        Ok(completion)
    }

    async fn create_chat_completion_stream(
        &self,
        mut request: OpenAIChatCompletionRequest,
    ) -> Result<FragmentStream, ProviderError> {
        request.stream = true;

        let response = self.send(&request).await?;
        Ok(fragment_stream(response))
    }

    fn provider_name(&self) -> &str {
        "OpenRouter"
    }
}
