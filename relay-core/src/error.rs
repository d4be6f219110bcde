//! Error handling for relay-core

use std::fmt;

pub use crate::publisher::QueueClosed;
pub use crate::transport::TransportError;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay-core library
#[derive(Debug)]
pub enum RelayError {
    /// Model provider errors
    Provider(ProviderError),
    /// Chat transport errors
    Transport(TransportError),
    /// Conversation store errors
    Store(StoreError),
    /// Configuration errors
    Config(ConfigError),
    /// The update queue is closed
    Queue(QueueClosed),
    /// Generic errors with context
    Other {
        /// Error message
        message: String,
        /// Optional source error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Model provider errors
#[derive(Debug)]
pub enum ProviderError {
    /// The HTTP request could not be sent
    Request { details: String },
    /// The provider answered with a non-success status
    Status { status: u16, body: String },
    /// The provider reported an error inside the event stream
    Api { message: String },
    /// The response stream broke off
    Stream { details: String },
}

/// Conversation store errors
#[derive(Debug)]
pub enum StoreError {
    /// Record not found
    RecordNotFound { record_id: i64 },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Missing required configuration
    MissingRequired { key: String },
    /// Invalid configuration value
    InvalidValue { key: String, value: String, expected: String },
    /// Configuration source could not be loaded
    LoadFailed { reason: String },
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Provider(err) => write!(f, "Provider error: {}", err),
            RelayError::Transport(err) => write!(f, "Transport error: {}", err),
            RelayError::Store(err) => write!(f, "Store error: {}", err),
            RelayError::Config(err) => write!(f, "Configuration error: {}", err),
            RelayError::Queue(err) => write!(f, "Queue error: {}", err),
            RelayError::Other { message, .. } => write!(f, "{}", message),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Request { details } => write!(f, "Request failed: {}", details),
            ProviderError::Status { status, body } => {
                write!(f, "API error: {} - {}", status, body)
            }
            ProviderError::Api { message } => write!(f, "API error: {}", message),
            ProviderError::Stream { details } => write!(f, "Stream error: {}", details),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RecordNotFound { record_id } => {
                write!(f, "Dialog record {} not found", record_id)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired { key } => write!(f, "Missing required configuration: {}", key),
            ConfigError::InvalidValue { key, value, expected } => {
                write!(f, "Invalid value for '{}': '{}' (expected: {})", key, value, expected)
            }
            ConfigError::LoadFailed { reason } => write!(f, "Failed to load configuration: {}", reason),
        }
    }
}

impl std::error::Error for ProviderError {}
impl std::error::Error for StoreError {}
impl std::error::Error for ConfigError {}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Provider(err) => Some(err),
            RelayError::Transport(err) => Some(err),
            RelayError::Store(err) => Some(err),
            RelayError::Config(err) => Some(err),
            RelayError::Queue(err) => Some(err),
            RelayError::Other { source, .. } => {
                source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
            }
        }
    }
}

impl From<ProviderError> for RelayError {
    fn from(err: ProviderError) -> Self {
        RelayError::Provider(err)
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        RelayError::Transport(err)
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::Store(err)
    }
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Config(err)
    }
}

impl From<QueueClosed> for RelayError {
    fn from(err: QueueClosed) -> Self {
        RelayError::Queue(err)
    }
}

impl RelayError {
    /// Create a generic error with a message
    pub fn other<S: Into<String>>(message: S) -> Self {
        RelayError::Other {
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic error wrapping a source error
    pub fn with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        RelayError::Other {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
