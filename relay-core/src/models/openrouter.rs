//! OpenRouter-compatible HTTP provider.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, error};

use super::provider::{ByteStream, ChatProvider};
use super::types::ChatCompletionRequest;
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, RelayError, Result};

/// Streams chat completions from an OpenAI-style `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    site_url: Option<String>,
    site_name: Option<String>,
}

impl OpenRouterProvider {
    /// Build a provider from configuration.
    ///
    /// # Errors
    /// Returns a configuration error when no API key is configured.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "provider.api_key".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| RelayError::with_source("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            site_url: config.site_url.clone(),
            site_name: config.site_name.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatProvider for OpenRouterProvider {
    async fn open_stream(&self, request: &ChatCompletionRequest) -> std::result::Result<ByteStream, ProviderError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        if let Some(site_url) = &self.site_url {
            builder = builder.header("HTTP-Referer", site_url);
        }
        if let Some(site_name) = &self.site_name {
            builder = builder.header("X-Title", site_name);
        }

        debug!(model = %request.model, messages = request.messages.len(), "Opening completion stream");
        let response = builder.send().await.map_err(|e| ProviderError::Request {
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Provider rejected completion request");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response.bytes_stream().map_err(|e| ProviderError::Stream {
            details: e.to_string(),
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}
