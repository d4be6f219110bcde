//! Bounded update queue with unfinished-work accounting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::warn;

use super::update::PartialUpdate;

/// The publisher side of the queue is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("update queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct Accounting {
    unfinished: AtomicUsize,
    finished: Notify,
}

impl Accounting {
    fn task_done(&self) {
        match self
            .unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => self.finished.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!("task_done() called more times than updates were queued"),
        }
    }
}

/// Create a bounded multi-producer queue of updates with a single consumer.
///
/// Every queued update counts as unfinished until the consumer calls
/// [`UpdateReceiver::task_done`]; [`UpdateSender::join`] waits for that count
/// to drop to zero.
pub fn update_queue(capacity: usize) -> (UpdateSender, UpdateReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let accounting = Arc::new(Accounting::default());
    (
        UpdateSender {
            tx,
            accounting: Arc::clone(&accounting),
        },
        UpdateReceiver { rx, accounting },
    )
}

/// Producer handle. Cheap to clone; one per stream worker.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    tx: mpsc::Sender<PartialUpdate>,
    accounting: Arc<Accounting>,
}

impl UpdateSender {
    /// Queue an update, waiting while the queue is full.
    ///
    /// Cancel safe: dropping the future before it resolves queues nothing and
    /// leaves the unfinished count untouched.
    pub async fn send(&self, update: PartialUpdate) -> Result<(), QueueClosed> {
        let permit = self.tx.reserve().await.map_err(|_| QueueClosed)?;
        // counted before the update is visible so the consumer never sees a negative balance
        self.accounting.unfinished.fetch_add(1, Ordering::AcqRel);
        permit.send(update);
        Ok(())
    }

    /// Number of queued updates not yet marked done.
    pub fn pending(&self) -> usize {
        self.accounting.unfinished.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until every queued update has been processed.
    pub async fn join(&self) {
        loop {
            let notified = self.accounting.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Consumer handle, owned by the publisher task.
#[derive(Debug)]
pub struct UpdateReceiver {
    rx: mpsc::Receiver<PartialUpdate>,
    accounting: Arc<Accounting>,
}

impl UpdateReceiver {
    /// Next update in FIFO order; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<PartialUpdate> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PartialUpdate> {
        self.rx.try_recv().ok()
    }

    /// Mark one received update as fully processed.
    pub fn task_done(&self) {
        self.accounting.task_done();
    }

    /// Refuse further sends; already queued updates can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
