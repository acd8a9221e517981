//! Chunk Queue
//!
//! The only state shared between the background relay task and the UI
//! context. The relay pushes [`StreamEvent`]s; the UI context waits on
//! [`ChunkQueue::ready`] and then takes every buffered event at once with
//! [`ChunkQueue::drain`].
//!
//! The lock is held only long enough to push one event or to move the whole
//! buffer out, so a slow sink never blocks the producer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::events::StreamEvent;

/// Thread-safe FIFO of stream events with a drain wake-up
#[derive(Debug, Default)]
pub struct ChunkQueue {
    /// Buffered events, oldest first
    events: Mutex<VecDeque<StreamEvent>>,
    /// Wakes the UI-side drain; coalesces multiple pushes into one wake-up
    ready: Notify,
}

impl ChunkQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and schedule a drain
    pub fn push(&self, event: StreamEvent) {
        self.events.lock().push_back(event);
        self.ready.notify_one();
    }

    /// Remove and return every buffered event in FIFO order
    pub fn drain(&self) -> Vec<StreamEvent> {
        let drained = std::mem::take(&mut *self.events.lock());
        drained.into()
    }

    /// Wait until at least one push has happened since the last wake-up
    ///
    /// A push made while nobody is waiting is remembered, so a drain is never
    /// lost between `drain()` and the next `ready().await`.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    /// Number of buffered events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop all buffered events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_drain_is_fifo_and_empties() {
        let queue = ChunkQueue::new();
        queue.push(StreamEvent::chunk("A"));
        queue.push(StreamEvent::chunk("B"));
        queue.push(StreamEvent::Complete);
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                StreamEvent::chunk("A"),
                StreamEvent::chunk("B"),
                StreamEvent::Complete
            ]
        );
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = ChunkQueue::new();
        queue.push(StreamEvent::chunk("A"));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let queue = ChunkQueue::new();
        queue.push(StreamEvent::chunk("early"));

        // Permit stored by the earlier push
        queue.ready().await;
        assert_eq!(queue.drain(), vec![StreamEvent::chunk("early")]);
    }

    #[tokio::test]
    async fn test_cross_thread_pushes_keep_order() {
        let queue = Arc::new(ChunkQueue::new());
        let producer = Arc::clone(&queue);

        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.push(StreamEvent::chunk(format!("{i}")));
            }
        });
        handle.join().unwrap();

        let drained = queue.drain();
        let expected: Vec<_> = (0..100).map(|i| StreamEvent::chunk(format!("{i}"))).collect();
        assert_eq!(drained, expected);
    }
}
