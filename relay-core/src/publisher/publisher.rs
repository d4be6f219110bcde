//! Single consumer of the update queue.
//!
//! The publisher owns every chat-side effect of a stream: editing the live
//! message, splitting over-long answers, swapping controls and storing the
//! final answer. Terminal updates are applied at most once per destination.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::chunking::{split_final, truncate_for_display};
use super::queue::UpdateReceiver;
use super::update::{PartialUpdate, PersistenceMode, UpdateKind};
use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::config::{NoticeConfig, PublisherConfig};
use crate::markup::to_telegram_markdown;
use crate::relay::{ActiveStreams, SessionRegistry};
use crate::store::ConversationStore;
use crate::transport::{ChatTransport, Controls, EditOutcome, TransportError};
use crate::types::{Destination, MessageId};

/// Finalized destinations remembered for ignoring repeated terminals.
const FINALIZED_HISTORY: usize = 1024;

/// What is currently shown at a destination that is still streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSlot {
    pub last_published_text: String,
    pub last_controls: Controls,
    pub last_publish_time: Instant,
}

#[derive(Debug, Default)]
struct FinalizedSet {
    order: VecDeque<Destination>,
    members: HashSet<Destination>,
}

impl FinalizedSet {
    fn contains(&self, destination: &Destination) -> bool {
        self.members.contains(destination)
    }

    fn insert(&mut self, destination: Destination) {
        if !self.members.insert(destination) {
            return;
        }
        self.order.push_back(destination);
        if self.order.len() > FINALIZED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

/// Applies queued updates to the chat transport.
///
/// Exactly one publisher consumes the update queue, so live slots are only
/// ever touched from its task.
pub struct UpdatePublisher {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn ConversationStore>,
    sessions: SessionRegistry,
    active: ActiveStreams,
    config: PublisherConfig,
    notices: NoticeConfig,
    clock: Arc<dyn Clock>,
    slots: HashMap<Destination, LiveSlot>,
    finalized: FinalizedSet,
}

impl UpdatePublisher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn ConversationStore>,
        sessions: SessionRegistry,
        active: ActiveStreams,
        config: PublisherConfig,
        notices: NoticeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            store,
            sessions,
            active,
            config,
            notices,
            clock,
            slots: HashMap::new(),
            finalized: FinalizedSet::default(),
        }
    }

    pub fn live_slot(&self, destination: &Destination) -> Option<&LiveSlot> {
        self.slots.get(destination)
    }

    pub fn is_finalized(&self, destination: &Destination) -> bool {
        self.finalized.contains(destination)
    }

    /// Drain `receiver` until every sender is gone or `shutdown` fires.
    ///
    /// On shutdown, updates already queued are still applied.
    pub async fn run(mut self, mut receiver: UpdateReceiver, shutdown: CancellationToken) {
        info!("Update publisher started");
        loop {
            tokio::select! {
                biased;
                update = receiver.recv() => match update {
                    Some(update) => {
                        self.apply(update).await;
                        receiver.task_done();
                    }
                    None => break,
                },
                _ = shutdown.wait_for_cancellation() => {
                    receiver.close();
                    while let Some(update) = receiver.try_recv() {
                        self.apply(update).await;
                        receiver.task_done();
                    }
                    break;
                }
            }
        }
        info!(live_slots = self.slots.len(), "Update publisher stopped");
    }

    /// Apply one update.
    pub async fn apply(&mut self, update: PartialUpdate) {
        if update.is_final() {
            self.apply_final(update).await;
        } else {
            self.apply_partial(update).await;
        }
    }

    async fn apply_partial(&mut self, update: PartialUpdate) {
        let destination = update.destination;
        if self.finalized.contains(&destination) {
            debug!(%destination, "Dropping update for finalized destination");
            return;
        }

        let display = truncate_for_display(
            &self.render(&update.text),
            self.config.max_message_len,
            &self.config.truncation_marker,
        );
        if display.is_empty() {
            return;
        }
        if let Some(slot) = self.slots.get(&destination) {
            if slot.last_published_text == display {
                debug!(%destination, "Skipping duplicate update");
                return;
            }
        }

        let published = self
            .transport
            .edit_message(destination.chat_id, destination.message_id, &display, Controls::Cancel)
            .await;
        match published {
            Ok(_) => {
                self.slots.insert(
                    destination,
                    LiveSlot {
                        last_published_text: display,
                        last_controls: Controls::Cancel,
                        last_publish_time: self.clock.now(),
                    },
                );
            }
            Err(e) => warn!(%destination, error = %e, "Failed to publish partial update"),
        }
    }

    async fn apply_final(&mut self, update: PartialUpdate) {
        let destination = update.destination;
        if self.finalized.contains(&destination) {
            debug!(%destination, "Ignoring repeated terminal update");
            return;
        }
        self.finalized.insert(destination);

        let display = self.final_display_text(&update);
        let slot = self.slots.remove(&destination);
        let controls = match update.kind {
            UpdateKind::Completed => Controls::Regenerate,
            _ => Controls::None,
        };

        let answer_message = match slot {
            Some(slot) if slot.last_published_text == display => {
                if slot.last_controls != controls {
                    debug!(%destination, "Final text already shown, replacing controls");
                    let result = self
                        .transport
                        .edit_controls(destination.chat_id, destination.message_id, controls)
                        .await;
                    log_edit(destination, result);
                }
                destination.message_id
            }
            _ => self.publish_final(destination, &display, controls).await,
        };

        if self.active.release_if(destination) {
            debug!(%destination, "Released active stream");
        }
        self.persist(&update, answer_message).await;
        self.active.notify_finalized(destination);
    }

    fn final_display_text(&self, update: &PartialUpdate) -> String {
        if update.kind == UpdateKind::Completed && update.text.trim().is_empty() {
            return self.notices.empty_answer.clone();
        }
        self.render(&update.text)
    }

    fn render(&self, text: &str) -> String {
        if self.config.render_markdown {
            to_telegram_markdown(text)
        } else {
            text.to_string()
        }
    }

    /// Publish final text, splitting it when over-long. Returns the message
    /// that ends up carrying `controls`.
    async fn publish_final(&self, destination: Destination, text: &str, controls: Controls) -> MessageId {
        let chat = destination.chat_id;
        if text.chars().count() <= self.config.max_message_len {
            let result = self
                .transport
                .edit_message(chat, destination.message_id, text, controls)
                .await;
            log_edit(destination, result);
            return destination.message_id;
        }

        let label = self.config.number_parts.then_some(self.notices.part_label.as_str());
        let parts = split_final(text, self.config.max_message_len, label);
        info!(%destination, parts = parts.len(), "Splitting over-long answer");

        if let Err(e) = self.transport.delete_message(chat, destination.message_id).await {
            warn!(%destination, error = %e, "Failed to delete streamed message before splitting");
        }

        let mut last = destination.message_id;
        let count = parts.len();
        for (i, part) in parts.iter().enumerate() {
            let part_controls = if i + 1 == count { controls } else { Controls::None };
            match self.transport.send_message(chat, part, part_controls).await {
                Ok(id) => last = id,
                Err(e) => warn!(%destination, part = i + 1, error = %e, "Failed to send answer part"),
            }
        }
        last
    }

    async fn persist(&self, update: &PartialUpdate, answer_message: MessageId) {
        let Some(persistence) = &update.persistence else {
            return;
        };
        if update.kind != UpdateKind::Completed {
            return;
        }
        let chat = update.destination.chat_id;

        match &persistence.mode {
            PersistenceMode::Overwrite => {
                if let Err(e) = self
                    .store
                    .update_answer(persistence.record, update.text.clone())
                    .await
                {
                    warn!(record = %persistence.record, error = %e, "Failed to store answer");
                    return;
                }
                self.sessions
                    .rebind_answer(chat, persistence.record, persistence.record, answer_message);
            }
            PersistenceMode::Regenerated(turn) => {
                let mut turn = turn.clone();
                turn.answer = Some(update.text.clone());
                let record = match self.store.append_turn(turn).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(previous = %persistence.record, error = %e, "Failed to store regenerated answer");
                        return;
                    }
                };
                if let Err(e) = self.store.mark_inactive(persistence.record).await {
                    warn!(record = %persistence.record, error = %e, "Failed to retire superseded answer");
                }
                self.sessions
                    .rebind_answer(chat, persistence.record, record, answer_message);
                debug!(previous = %persistence.record, %record, "Stored regenerated answer");
            }
        }
    }
}

fn log_edit(destination: Destination, result: Result<EditOutcome, TransportError>) {
    match result {
        Ok(EditOutcome::Edited) => {}
        Ok(EditOutcome::NotModified) => debug!(%destination, "Message not modified"),
        Err(e) => warn!(%destination, error = %e, "Failed to publish final update"),
    }
}

impl std::fmt::Debug for UpdatePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatePublisher")
            .field("config", &self.config)
            .field("live_slots", &self.slots.len())
            .finish()
    }
}
