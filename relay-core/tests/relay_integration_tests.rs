//! End-to-end tests of the relay: orchestrator, stream worker, publisher
//! and store working together

mod common;

use common::{delta, done, eventually, fast_config, RecordingTransport, ScriptedProvider};
use relay_core::config::RelayConfig;
use relay_core::models::{ConversationTurn, Role};
use relay_core::store::{ConversationStore, InMemoryConversationStore, NewTurn};
use relay_core::transport::Controls;
use relay_core::types::{ChatId, DialogId, UserId};
use relay_core::{GuardState, RelayBuilder, RelayOrchestrator, RelayOutcome};
use std::sync::Arc;

const USER: UserId = UserId(1);
const CHAT: ChatId = ChatId(42);

struct Fixture {
    relay: RelayOrchestrator,
    provider: Arc<ScriptedProvider>,
    transport: Arc<RecordingTransport>,
    store: InMemoryConversationStore,
}

fn fixture_with(config: RelayConfig) -> Fixture {
    let provider = Arc::new(ScriptedProvider::new());
    let transport = Arc::new(RecordingTransport::new());
    let store = InMemoryConversationStore::new();
    let relay = RelayBuilder::new(config)
        .provider(provider.clone())
        .transport(transport.clone())
        .store(Arc::new(store.clone()))
        .build()
        .unwrap();
    Fixture {
        relay,
        provider,
        transport,
        store,
    }
}

fn fixture() -> Fixture {
    fixture_with(fast_config())
}

async fn ask(f: &Fixture, text: &str) -> relay_core::RelayTicket {
    f.relay
        .handle_user_message(USER, CHAT, text)
        .await
        .unwrap()
        .into_ticket()
        .expect("stream should start")
}

/// Without a selected model the user is told to pick one
#[tokio::test]
async fn test_message_without_model_sends_notice() {
    let f = fixture();

    let outcome = f.relay.handle_user_message(USER, CHAT, "hello").await.unwrap();

    assert!(matches!(outcome, RelayOutcome::ModelNotSelected));
    let sends = f.transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].1, "Please select a model first with /select_model");
    assert_eq!(sends[0].2, Controls::None);
    assert!(f.provider.requests().is_empty());
    assert!(f.store.records().is_empty());
}

/// A streamed answer is shown, stored and resent as history next time
#[tokio::test]
async fn test_answer_is_streamed_stored_and_reused() {
    let f = fixture();
    assert_eq!(f.relay.select_model(USER, CHAT, "test-model").await.unwrap(), DialogId(1));

    f.provider.push_body([delta("Rust is "), delta("fast."), done()]);
    let ticket = ask(&f, "What is Rust?").await;
    let destination = ticket.destination;
    assert!(ticket.usage_percent > 0.0);
    assert!(!ticket.suggest_new_dialog);
    let outcome = ticket.wait().await.unwrap();

    assert_eq!(outcome.state, GuardState::Completed);
    assert_eq!(outcome.text, "Rust is fast.");
    let placeholder = &f.transport.sends()[0];
    assert_eq!(placeholder.0, destination.message_id);
    assert_eq!(placeholder.1, "Generating answer...");
    assert_eq!(placeholder.2, Controls::Cancel);
    assert_eq!(
        f.transport.shown(destination.message_id).as_deref(),
        Some("Rust is fast.")
    );
    assert_eq!(
        f.transport.last_edit_controls(destination),
        Some(Controls::Regenerate)
    );
    assert!(f.relay.active_streams().is_empty());

    let records = f.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].question, "What is Rust?");
    assert_eq!(records[0].answer.as_deref(), Some("Rust is fast."));
    let session = f.relay.sessions().get(CHAT).unwrap();
    assert_eq!(session.current_record, Some(records[0].id));
    assert_eq!(session.answer_message, Some(destination.message_id));

    f.provider.push_body([delta("Yes."), done()]);
    ask(&f, "Is it safe?").await.wait().await.unwrap();

    let requests = f.provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].model, "test-model");
    assert_eq!(
        requests[1].messages,
        vec![
            ConversationTurn::user("What is Rust?"),
            ConversationTurn::assistant("Rust is fast."),
            ConversationTurn::user("Is it safe?"),
        ]
    );
}

/// Cancelling keeps the partial text, adds a notice and stores nothing
#[tokio::test]
async fn test_cancel_mid_stream() {
    let f = fixture();
    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    let feed = f.provider.push_feed();

    let ticket = ask(&f, "Tell me a story").await;
    let message = ticket.destination.message_id;
    feed.delta("Once upon a time");
    eventually(|| f.transport.shown(message).as_deref() == Some("Once upon a time")).await;

    assert!(f.relay.cancel_stream(CHAT));
    let outcome = ticket.wait().await.unwrap();

    assert_eq!(outcome.state, GuardState::Canceled);
    assert!(feed.is_dropped());
    assert_eq!(
        f.transport.shown(message).as_deref(),
        Some("Once upon a time\n\n[Generation stopped by user]")
    );
    assert!(f.relay.active_streams().is_empty());
    assert!(!f.relay.cancel_stream(CHAT));
    assert_eq!(f.store.records()[0].answer, None);
    assert_eq!(f.relay.sessions().get(CHAT).unwrap().answer_message, None);
}

/// A new message while streaming cancels the old stream and starts a new one
#[tokio::test]
async fn test_new_message_replaces_running_stream() {
    let f = fixture();
    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    let first_feed = f.provider.push_feed();
    f.provider.push_body([delta("Second answer"), done()]);

    let first = ask(&f, "First question").await;
    let first_message = first.destination.message_id;
    first_feed.delta("First");
    eventually(|| f.transport.shown(first_message).as_deref() == Some("First")).await;

    let second = ask(&f, "Second question").await;
    assert_ne!(second.destination, first.destination);
    let second_message = second.destination.message_id;

    let first_outcome = first.wait().await.unwrap();
    let second_outcome = second.wait().await.unwrap();

    assert_eq!(first_outcome.state, GuardState::Canceled);
    assert_eq!(second_outcome.state, GuardState::Completed);
    assert_eq!(
        f.transport.shown(first_message).as_deref(),
        Some("First\n\n[Generation stopped by user]")
    );
    assert_eq!(
        f.transport.shown(second_message).as_deref(),
        Some("Second answer")
    );
    assert!(f.relay.active_streams().is_empty());

    let records = f.store.records();
    assert_eq!(records[0].answer, None);
    assert_eq!(records[1].answer.as_deref(), Some("Second answer"));
}

/// Regenerating replaces the answer message and the stored record
#[tokio::test]
async fn test_regenerate_replaces_answer() {
    let f = fixture();
    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    f.provider.push_body([delta("First try"), done()]);
    let original = ask(&f, "Pick a number").await;
    let original_message = original.destination.message_id;
    original.wait().await.unwrap();

    f.provider.push_body([delta("Second try"), done()]);
    let ticket = f
        .relay
        .regenerate(CHAT)
        .await
        .unwrap()
        .into_ticket()
        .unwrap();
    let destination = ticket.destination;
    ticket.wait().await.unwrap();

    assert_eq!(f.transport.deletes(), vec![original_message]);
    assert_eq!(f.transport.shown(original_message), None);
    assert_eq!(
        f.transport.shown(destination.message_id).as_deref(),
        Some("Second try")
    );

    let records = f.store.records();
    assert_eq!(records.len(), 2);
    assert!(!records[0].displayed);
    assert_eq!(records[0].answer.as_deref(), Some("First try"));
    assert!(records[1].displayed);
    assert_eq!(records[1].question, "Pick a number");
    assert_eq!(records[1].answer.as_deref(), Some("Second try"));

    let session = f.relay.sessions().get(CHAT).unwrap();
    assert_eq!(session.current_record, Some(records[1].id));
    assert_eq!(session.answer_message, Some(destination.message_id));

    // the superseded answer is not resent as history
    let requests = f.provider.requests();
    assert_eq!(requests[1].messages, vec![ConversationTurn::user("Pick a number")]);
    let history = f.store.fetch_history(USER, DialogId(1), None).await.unwrap();
    assert_eq!(
        history,
        vec![
            ConversationTurn::user("Pick a number"),
            ConversationTurn::assistant("Second try"),
        ]
    );
}

/// When the old answer cannot be deleted it is overwritten with a notice
#[tokio::test]
async fn test_regenerate_falls_back_to_edit_when_delete_fails() {
    let f = fixture();
    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    f.provider.push_body([delta("Old"), done()]);
    let original = ask(&f, "Question").await;
    let original_dest = original.destination;
    original.wait().await.unwrap();

    f.transport.fail_deletes();
    f.provider.push_body([delta("New"), done()]);
    f.relay
        .regenerate(CHAT)
        .await
        .unwrap()
        .into_ticket()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(f.transport.deletes(), vec![original_dest.message_id]);
    assert_eq!(
        f.transport.shown(original_dest.message_id).as_deref(),
        Some("Regenerating answer...")
    );
    assert_eq!(f.transport.last_edit_controls(original_dest), Some(Controls::None));
}

/// Regenerate needs a previous question
#[tokio::test]
async fn test_regenerate_without_question() {
    let f = fixture();
    assert!(matches!(
        f.relay.regenerate(CHAT).await.unwrap(),
        RelayOutcome::ModelNotSelected
    ));

    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    assert!(matches!(
        f.relay.regenerate(CHAT).await.unwrap(),
        RelayOutcome::NothingToRegenerate
    ));
}

/// Resetting the dialog starts over with an empty history
#[tokio::test]
async fn test_reset_dialog_drops_history() {
    let f = fixture();
    assert_eq!(f.relay.reset_dialog(CHAT).await.unwrap(), None);

    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    f.provider.push_body([delta("Hi!"), done()]);
    ask(&f, "Hello").await.wait().await.unwrap();

    assert_eq!(f.relay.reset_dialog(CHAT).await.unwrap(), Some(DialogId(2)));
    let session = f.relay.sessions().get(CHAT).unwrap();
    assert_eq!(session.dialog, DialogId(2));
    assert_eq!(session.last_question, None);

    f.provider.push_body([delta("Hello again"), done()]);
    ask(&f, "Hello").await.wait().await.unwrap();
    assert_eq!(
        f.provider.requests()[1].messages,
        vec![ConversationTurn::user("Hello")]
    );
}

/// Old turns are left out once the model's context budget is exceeded
#[tokio::test]
async fn test_history_is_trimmed_to_context_limit() {
    let f = fixture();
    f.store.set_context_limit("small-model", 39);
    let dialog = f.relay.select_model(USER, CHAT, "small-model").await.unwrap();
    for i in 1..=3 {
        f.store
            .append_turn(NewTurn {
                chat_id: CHAT,
                user_id: USER,
                dialog,
                model_id: "small-model".to_string(),
                question: format!("q{i}"),
                answer: Some("a".repeat(100)),
            })
            .await
            .unwrap();
    }

    f.provider.push_body([delta("ok"), done()]);
    let ticket = ask(&f, "hi").await;

    assert_eq!(ticket.dropped_turns, 5);
    assert!(ticket.suggest_new_dialog);
    assert!(ticket.usage_percent > 90.0 && ticket.usage_percent < 100.0);
    ticket.wait().await.unwrap();

    let messages = &f.provider.requests()[0].messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[1], ConversationTurn::user("hi"));
}

/// A failing provider shows the error and leaves the question unanswered
#[tokio::test]
async fn test_provider_error_is_shown() {
    let f = fixture();
    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    f.provider.push_status(429, "Rate limit exceeded");

    let ticket = ask(&f, "Anyone there?").await;
    let message = ticket.destination.message_id;
    let outcome = ticket.wait().await.unwrap();

    assert_eq!(outcome.state, GuardState::Failed);
    let shown = f.transport.shown(message).unwrap();
    assert!(shown.starts_with("An error occurred while requesting the model"));
    assert!(shown.contains("429"));
    assert_eq!(f.store.records()[0].answer, None);
    assert!(f.relay.active_streams().is_empty());
}

/// Shutdown stops running streams and lets the publisher finish
#[tokio::test]
async fn test_shutdown_cancels_streams() {
    let f = fixture();
    f.relay.select_model(USER, CHAT, "test-model").await.unwrap();
    let feed = f.provider.push_feed();

    let ticket = ask(&f, "Go on forever").await;
    let message = ticket.destination.message_id;
    feed.delta("Still going");
    eventually(|| f.transport.shown(message).as_deref() == Some("Still going")).await;

    f.relay.shutdown().await.unwrap();

    assert!(feed.is_dropped());
    assert_eq!(f.relay.updates().pending(), 0);
    assert_eq!(
        f.transport.shown(message).as_deref(),
        Some("Still going\n\n[Generation stopped by user]")
    );
    assert_eq!(ticket.wait().await.unwrap().state, GuardState::Canceled);
}

#[cfg(feature = "http")]
mod openrouter {
    use super::*;
    use relay_core::config::ProviderConfig;
    use relay_core::OpenRouterProvider;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// The HTTP provider streams a real event-stream body through the relay
    #[tokio::test]
    async fn test_relay_over_http_provider() {
        let server = MockServer::start().await;
        let body = [delta("Hello"), delta(" from"), delta(" the server"), done()].concat();
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-model", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider_config = ProviderConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".to_string()),
            ..ProviderConfig::default()
        };
        let transport = Arc::new(RecordingTransport::new());
        let store = InMemoryConversationStore::new();
        let relay = RelayBuilder::new(fast_config())
            .provider(Arc::new(OpenRouterProvider::new(&provider_config).unwrap()))
            .transport(transport.clone())
            .store(Arc::new(store.clone()))
            .build()
            .unwrap();

        relay.select_model(USER, CHAT, "test-model").await.unwrap();
        let ticket = relay
            .handle_user_message(USER, CHAT, "Hi")
            .await
            .unwrap()
            .into_ticket()
            .unwrap();
        let message = ticket.destination.message_id;
        let outcome = ticket.wait().await.unwrap();

        assert_eq!(outcome.state, GuardState::Completed);
        assert_eq!(
            transport.shown(message).as_deref(),
            Some("Hello from the server")
        );
        assert_eq!(
            store.records()[0].answer.as_deref(),
            Some("Hello from the server")
        );
        relay.shutdown().await.unwrap();
    }
}
