//! Rate-limited publication of streamed text.
//!
//! Stream workers push [`PartialUpdate`]s into a bounded queue; a single
//! [`UpdatePublisher`] task drains it, deduplicates snapshots, fits text into
//! the transport's size limit and finalizes each destination exactly once.

mod chunking;
mod publisher;
mod queue;
mod update;

pub use chunking::{part_header, split_final, truncate_for_display};
pub use publisher::{LiveSlot, UpdatePublisher};
pub use queue::{update_queue, QueueClosed, UpdateReceiver, UpdateSender};
pub use update::{PartialUpdate, PersistenceMode, PersistenceRef, UpdateKind};
