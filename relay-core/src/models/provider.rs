//! The model provider seam.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use super::types::ChatCompletionRequest;
use crate::error::ProviderError;

/// Raw response body of a streamed completion.
///
/// Dropping the stream closes the underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// A completion endpoint that answers with a server-sent-event stream.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send one streamed request and return the response body.
    ///
    /// A non-success status must be reported as [`ProviderError::Status`] here,
    /// before any byte of the body is handed out.
    async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ByteStream, ProviderError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "provider"
    }
}
