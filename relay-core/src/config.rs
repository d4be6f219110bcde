//! Relay configuration.
//!
//! Every section has serde defaults, so a configuration file only needs the
//! keys it wants to change. With the `config-support` feature the
//! configuration is layered: an optional TOML file first, then environment
//! variables of the form `RELAY__SECTION__KEY` (for example
//! `RELAY__STREAM__TIMEOUT_SECS=120`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Environment variable consulted when no provider API key is configured.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Top-level relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub provider: ProviderConfig,
    pub stream: StreamConfig,
    pub context: ContextConfig,
    pub publisher: PublisherConfig,
    pub notices: NoticeConfig,
}

/// Model provider endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API; `/chat/completions` is appended
    pub base_url: String,
    pub api_key: Option<String>,
    /// Sent as `HTTP-Referer` for provider-side attribution
    pub site_url: Option<String>,
    /// Sent as `X-Title` for provider-side attribution
    pub site_name: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            site_url: None,
            site_name: None,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Timing of a single stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum spacing between two snapshots offered for one destination
    pub update_interval_ms: u64,
    /// How often the guard is checked while no event is available
    pub poll_interval_ms: u64,
    /// Hard ceiling on the lifetime of a stream
    pub timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1500,
            poll_interval_ms: 100,
            timeout_secs: 300,
        }
    }
}

impl StreamConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Context window budgeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Used when the store does not know the model's context length
    pub default_context_limit: u32,
    /// Share of the context limit the history may fill
    pub fill_ratio: f64,
    /// Usage percentage above which a new dialog is suggested
    pub new_dialog_threshold_percent: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_context_limit: 4096,
            fill_ratio: 0.95,
            new_dialog_threshold_percent: 90.0,
        }
    }
}

/// Update publisher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Hard size ceiling of one transport message, in characters
    pub max_message_len: usize,
    /// Appended to truncated in-progress text
    pub truncation_marker: String,
    /// Prefix split messages with `Part i/n:`
    pub number_parts: bool,
    /// Convert Markdown to Telegram markup before publishing
    pub render_markdown: bool,
    /// Capacity of the update queue between stream workers and the publisher
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_message_len: 4096,
            truncation_marker: "...".to_string(),
            number_parts: true,
            render_markdown: true,
            queue_capacity: 256,
        }
    }
}

/// User-visible texts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeConfig {
    pub generating: String,
    pub canceled: String,
    pub timed_out: String,
    pub error_prefix: String,
    pub empty_answer: String,
    pub select_model: String,
    pub regenerating: String,
    pub part_label: String,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            generating: "Generating answer...".to_string(),
            canceled: "[Generation stopped by user]".to_string(),
            timed_out: "[Generation timed out]".to_string(),
            error_prefix: "An error occurred while requesting the model".to_string(),
            empty_answer: "The model returned an empty answer.".to_string(),
            select_model: "Please select a model first with /select_model".to_string(),
            regenerating: "Regenerating answer...".to_string(),
            part_label: "Part".to_string(),
        }
    }
}

impl RelayConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, value: impl ToString, expected: &str) -> crate::RelayError {
            ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                expected: expected.to_string(),
            }
            .into()
        }

        if self.stream.poll_interval_ms == 0 {
            return Err(invalid("stream.poll_interval_ms", 0, "a positive number of milliseconds"));
        }
        if self.stream.timeout_secs == 0 {
            return Err(invalid("stream.timeout_secs", 0, "a positive number of seconds"));
        }
        if !(self.context.fill_ratio > 0.0 && self.context.fill_ratio <= 1.0) {
            return Err(invalid("context.fill_ratio", self.context.fill_ratio, "a ratio in (0, 1]"));
        }
        if self.context.default_context_limit == 0 {
            return Err(invalid("context.default_context_limit", 0, "a positive token count"));
        }
        if self.publisher.queue_capacity == 0 {
            return Err(invalid("publisher.queue_capacity", 0, "a positive capacity"));
        }
        // Room for the part header, the truncation marker and at least some text.
        if self.publisher.max_message_len < 64 {
            return Err(invalid(
                "publisher.max_message_len",
                self.publisher.max_message_len,
                "at least 64 characters",
            ));
        }
        Ok(())
    }

    /// Fill the API key from the environment when the configuration has none.
    pub fn with_env_api_key(mut self) -> Self {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty());
        }
        self
    }
}

#[cfg(feature = "config-support")]
impl RelayConfig {
    /// Load configuration from an optional TOML file layered with `RELAY__*`
    /// environment variables.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .separator("__")
                .try_parsing(true),
        );
        Self::finish(builder)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Examples
    /// ```
    /// use relay_core::RelayConfig;
    ///
    /// let config = RelayConfig::from_toml_str("[stream]\ntimeout_secs = 60\n").unwrap();
    /// assert_eq!(config.stream.timeout_secs, 60);
    /// assert_eq!(config.publisher.max_message_len, 4096);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let loaded = builder
            .build()
            .and_then(|raw| raw.try_deserialize::<RelayConfig>())
            .map_err(|e| ConfigError::LoadFailed { reason: e.to_string() })?;
        let loaded = loaded.with_env_api_key();
        loaded.validate()?;
        Ok(loaded)
    }
}
