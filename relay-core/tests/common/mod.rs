//! Shared fakes for relay-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream;
use relay_core::config::RelayConfig;
use relay_core::error::ProviderError;
use relay_core::models::{ByteStream, ChatCompletionRequest, ChatProvider};
use relay_core::transport::{ChatTransport, Controls, EditOutcome, TransportError};
use relay_core::types::{ChatId, Destination, MessageId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// `data:` line carrying one content fragment
pub fn delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    )
}

/// `data:` line ending the stream
pub fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Configuration with timings suitable for tests: snapshots are offered as
/// soon as text grows and the guard is polled every 10 ms.
pub fn fast_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.stream.update_interval_ms = 0;
    config.stream.poll_interval_ms = 10;
    config.publisher.render_markdown = false;
    config
}

/// Wait until `condition` holds, polling every few milliseconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A transport call as observed by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        chat: ChatId,
        message: MessageId,
        text: String,
        controls: Controls,
    },
    Edit {
        chat: ChatId,
        message: MessageId,
        text: String,
        controls: Controls,
    },
    EditControls {
        chat: ChatId,
        message: MessageId,
        controls: Controls,
    },
    Delete {
        chat: ChatId,
        message: MessageId,
    },
}

/// In-memory chat that records every call.
///
/// Editing a message to the text it already shows reports `NotModified`,
/// like the Telegram API does.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    shown: Mutex<HashMap<MessageId, String>>,
    next_id: AtomicI64,
    fail_deletes: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts edited into `destination`, in order
    pub fn edits_to(&self, destination: Destination) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Edit { chat, message, text, .. }
                    if chat == destination.chat_id && message == destination.message_id =>
                {
                    Some(text)
                }
                _ => None,
            })
            .collect()
    }

    /// Controls set by the latest text or controls edit of `destination`
    pub fn last_edit_controls(&self, destination: Destination) -> Option<Controls> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Edit { chat, message, controls, .. } | Call::EditControls { chat, message, controls }
                if chat == destination.chat_id && message == destination.message_id =>
            {
                Some(controls)
            }
            _ => None,
        })
    }

    /// Number of controls-only edits of `destination`
    pub fn control_edits_to(&self, destination: Destination) -> usize {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(call, Call::EditControls { chat, message, .. }
                    if *chat == destination.chat_id && *message == destination.message_id)
            })
            .count()
    }

    pub fn sends(&self) -> Vec<(MessageId, String, Controls)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { message, text, controls, .. } => Some((message, text, controls)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Text currently shown by `message`
    pub fn shown(&self, message: MessageId) -> Option<String> {
        self.shown.lock().unwrap().get(&message).cloned()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        controls: Controls,
    ) -> Result<MessageId, TransportError> {
        let message = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.shown.lock().unwrap().insert(message, text.to_string());
        self.calls.lock().unwrap().push(Call::Send {
            chat,
            message,
            text: text.to_string(),
            controls,
        });
        Ok(message)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        controls: Controls,
    ) -> Result<EditOutcome, TransportError> {
        self.calls.lock().unwrap().push(Call::Edit {
            chat,
            message,
            text: text.to_string(),
            controls,
        });
        let mut shown = self.shown.lock().unwrap();
        match shown.get_mut(&message) {
            None => Err(TransportError::MessageNotFound),
            Some(current) if current == text => Ok(EditOutcome::NotModified),
            Some(current) => {
                *current = text.to_string();
                Ok(EditOutcome::Edited)
            }
        }
    }

    async fn edit_controls(
        &self,
        chat: ChatId,
        message: MessageId,
        controls: Controls,
    ) -> Result<EditOutcome, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::EditControls { chat, message, controls });
        if self.shown.lock().unwrap().contains_key(&message) {
            Ok(EditOutcome::Edited)
        } else {
            Err(TransportError::MessageNotFound)
        }
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::Delete { chat, message });
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TransportError::Forbidden("message can't be deleted".to_string()));
        }
        self.shown.lock().unwrap().remove(&message);
        Ok(())
    }
}

/// Live feed into one scripted response body
#[derive(Debug, Clone)]
pub struct Feed {
    tx: mpsc::UnboundedSender<Result<Bytes, ProviderError>>,
}

impl Feed {
    pub fn send(&self, raw: impl Into<String>) {
        let _ = self.tx.unbounded_send(Ok(Bytes::from(raw.into())));
    }

    pub fn delta(&self, text: &str) {
        self.send(delta(text));
    }

    pub fn done(&self) {
        self.send(done());
    }

    pub fn break_off(&self, details: &str) {
        let _ = self.tx.unbounded_send(Err(ProviderError::Stream {
            details: details.to_string(),
        }));
    }

    /// End the body without a done marker
    pub fn close(&self) {
        self.tx.close_channel();
    }

    /// True once the reader dropped the response
    pub fn is_dropped(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
enum Script {
    Body(Vec<String>),
    Feed(mpsc::UnboundedReceiver<Result<Bytes, ProviderError>>),
    Status(u16, String),
}

/// Provider answering requests from a queue of scripted responses.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response delivered all at once.
    pub fn push_body<I, S>(&self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = events.into_iter().map(Into::into).collect();
        self.scripts.lock().unwrap().push_back(Script::Body(events));
    }

    /// Queue a response fed by hand.
    pub fn push_feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.scripts.lock().unwrap().push_back(Script::Feed(rx));
        Feed { tx }
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Status(status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ByteStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Body(events)) => Ok(Box::pin(stream::iter(
                events.into_iter().map(|event| Ok(Bytes::from(event))),
            ))),
            Some(Script::Feed(rx)) => Ok(Box::pin(rx)),
            Some(Script::Status(status, body)) => Err(ProviderError::Status { status, body }),
            None => Err(ProviderError::Request {
                details: "no scripted response left".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
