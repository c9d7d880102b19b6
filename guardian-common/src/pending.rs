use crate::error::QueueError;
use crate::types::{MessagePublication, PendingMessage, MIN_MESSAGE_ID_LEN};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tokio::sync::RwLock;

/// Time-ordered, deduplicating holding area for observations whose release
/// is delayed. A binary min-heap on release time behind a single lock;
/// only push/pop/peek/remove are exposed, heap maintenance stays internal.
///
/// The intended consumer polls `peek`, pops only entries whose release
/// time has passed, and sleeps until the earliest remaining release.
pub struct PendingMessageQueue {
    heap: RwLock<BinaryHeap<Reverse<PendingMessage>>>,
}

impl PendingMessageQueue {
    pub fn new() -> Self {
        Self {
            heap: RwLock::new(BinaryHeap::new()),
        }
    }

    /// Inserts a message unless an entry with the same message id already
    /// exists. Messages with malformed ids are silently ignored. The
    /// contains-check and the insert share one write-lock critical section,
    /// so concurrent pushes of the same id can never both land.
    pub async fn push(&self, pending: PendingMessage) {
        let msg_id = pending.msg.message_id();
        if msg_id.len() < MIN_MESSAGE_ID_LEN {
            return;
        }

        let mut heap = self.heap.write().await;
        if heap.iter().any(|Reverse(p)| p.msg.message_id() == msg_id) {
            return;
        }
        heap.push(Reverse(pending));
    }

    /// Removes and returns the entry with the earliest release time.
    /// Returns `None` on an empty queue, never panics.
    pub async fn pop(&self) -> Option<PendingMessage> {
        self.heap.write().await.pop().map(|Reverse(p)| p)
    }

    /// Returns a copy of the earliest entry without removing it.
    pub async fn peek(&self) -> Option<PendingMessage> {
        self.heap.read().await.peek().map(|Reverse(p)| p.clone())
    }

    /// Pops every entry whose release time is at or before `now`, earliest
    /// first. Entries still in the future stay queued.
    pub async fn pop_released(&self, now: i64) -> Vec<PendingMessage> {
        let mut heap = self.heap.write().await;
        let mut released = Vec::new();
        loop {
            match heap.peek() {
                Some(Reverse(next)) if next.release_time <= now => {}
                _ => break,
            }
            if let Some(Reverse(pending)) = heap.pop() {
                released.push(pending);
            }
        }
        released
    }

    /// Removes the entry with the given message id from anywhere in the
    /// heap. An id that is not present is not an error; only an empty id
    /// argument is.
    pub async fn remove_item(
        &self,
        msg_id: &str,
    ) -> Result<Option<PendingMessage>, QueueError> {
        if msg_id.is_empty() {
            return Err(QueueError::EmptyMessageId);
        }

        let mut heap = self.heap.write().await;
        let mut entries = std::mem::take(&mut *heap).into_vec();
        let removed = entries
            .iter()
            .position(|Reverse(p)| p.msg.message_id() == msg_id)
            .map(|pos| entries.swap_remove(pos).0);
        *heap = BinaryHeap::from(entries);

        Ok(removed)
    }

    pub async fn contains(&self, pending: &PendingMessage) -> bool {
        let msg_id = pending.msg.message_id();
        self.heap
            .read()
            .await
            .iter()
            .any(|Reverse(p)| p.msg.message_id() == msg_id)
    }

    pub async fn fetch_message_publication(
        &self,
        msg_id: &str,
    ) -> Option<MessagePublication> {
        self.heap
            .read()
            .await
            .iter()
            .find(|Reverse(p)| p.msg.message_id() == msg_id)
            .map(|Reverse(p)| p.msg.clone())
    }

    /// Advisory length; may be stale by the time the caller acts on it.
    pub async fn len(&self) -> usize {
        self.heap.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.read().await.is_empty()
    }
}

impl Default for PendingMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
