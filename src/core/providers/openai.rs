//! OpenAI provider implementation

use crate::core::provider::{
    FragmentStream, Provider, ProviderError, fragment_stream, reject_in_band_error,
};
use crate::models::openai::{OpenAIChatCompletionRequest, OpenAIChatCompletionResponse};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::{debug, error};

/// OpenAI provider (supports OpenAI and Azure OpenAI)
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: Option<String>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `base_url` - OpenAI API base URL or Azure endpoint
    /// * `timeout` - Request timeout in seconds
    /// * `api_version` - Optional Azure API version (enables Azure mode)
    pub fn new(
        api_key: String,
        base_url: String,
        timeout: u64,
        api_version: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
        })
    }

    /// Classify OpenAI errors and provide helpful messages
    fn classify_error(error_detail: &str) -> String {
        let error_lower = error_detail.to_lowercase();

        if error_lower.contains("unsupported_country_region_territory")
            || error_lower.contains("country, region, or territory not supported")
        {
            return "OpenAI API is not available in your region. Consider using a VPN or Azure OpenAI service.".to_string();
        }

        if error_lower.contains("invalid_api_key") || error_lower.contains("incorrect api key") {
            return "Invalid API key. Please check the [openai] api_key configuration.".to_string();
        }

        if error_lower.contains("rate_limit") || error_lower.contains("quota") {
            return "Rate limit exceeded. Please wait and try again, or upgrade your API plan."
                .to_string();
        }

        if error_lower.contains("model")
            && (error_lower.contains("not found") || error_lower.contains("does not exist"))
        {
            return "Model not found. Please check the [models] configuration.".to_string();
        }

        if error_lower.contains("billing") || error_lower.contains("payment") {
            return "Billing issue. Please check your OpenAI account billing status.".to_string();
        }

        error_detail.to_string()
    }

    fn completions_url(&self, model: &str) -> String {
        match &self.api_version {
            // Azure deployments are addressed by model name
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model, version
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.api_version.is_some() {
            builder.header("api-key", &self.api_key)
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    /// Send the request and turn a non-success status into a `ProviderError`
    async fn send(
        &self,
        request: &OpenAIChatCompletionRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.completions_url(&request.model);
        debug!(
            "Sending request to {}: model={}, messages={}, stream={}",
            self.provider_name(),
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("{} returned {}: {}", self.provider_name(), status, error_text);
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
impl Provider for OpenAIProvider {
    async fn create_chat_completion(
        &self,
        request: &OpenAIChatCompletionRequest,
    ) -> Result<OpenAIChatCompletionResponse, ProviderError> {
        let response = self.send(request).await?;
        let completion = response
            .json::<OpenAIChatCompletionResponse>()
            .await
            .map_err(|e| ProviderError::Unexpected(format!("Failed to parse response: {}", e)))?;
        reject_in_band_error(completion)
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
        if self.api_version.is_some() {
            "Azure OpenAI"
        } else {
            "OpenAI"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_region_error() {
        let result = OpenAIProvider::classify_error("unsupported_country_region_territory");
        assert!(result.contains("region"));
    }

    #[test]
    fn test_classify_auth_error() {
        let result = OpenAIProvider::classify_error("invalid_api_key: The API key is invalid");
        assert!(result.contains("API key"));
    }

    #[test]
    fn test_azure_url() {
        let provider = OpenAIProvider::new(
            "key".to_string(),
            "https://example.openai.azure.com/".to_string(),
            10,
            Some("2024-06-01".to_string()),
        )
        .unwrap();
        assert_eq!(
            provider.completions_url("gpt-4o"),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
        assert_eq!(provider.provider_name(), "Azure OpenAI");
    }
}
