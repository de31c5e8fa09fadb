//! Compaction event feed.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

/// Emitted after every successful compaction of the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionEvent {
    /// Number of live documents written to the compacted file.
    pub live_documents: usize,
    /// Number of index envelopes written alongside them.
    pub index_count: usize,
}

/// Registry of compaction observers.
///
/// Subscribers receive events over an unbounded channel; a dropped
/// receiver is pruned at the next emit.
pub(crate) struct CompactionFeed {
    subscribers: Mutex<Vec<Sender<CompactionEvent>>>,
}

impl CompactionFeed {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<CompactionEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: CompactionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(event).is_ok());
    }
}
