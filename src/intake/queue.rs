//! Dedup intake queue.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use super::message::EmailMessage;

/// FIFO queue that admits each message id at most once per process
/// lifetime.
///
/// Seen-id tracking never evicts, so memory grows with every distinct
/// message for as long as the process runs.
pub struct DedupQueue {
    tx: mpsc::UnboundedSender<EmailMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EmailMessage>>,
    seen: Mutex<HashSet<String>>,
}

impl DedupQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Admit a message unless its id has been seen before. Returns whether
    /// it was enqueued.
    pub fn enqueue(&self, message: EmailMessage) -> bool {
        {
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert(message.id.clone()) {
                debug!(id = %message.id, "duplicate message discarded at intake");
                return false;
            }
        }
        self.tx.send(message).is_ok()
    }

    /// Wait for the next message, in first-in-first-out order.
    pub async fn dequeue(&self) -> EmailMessage {
        loop {
            if let Some(message) = self.rx.lock().await.recv().await {
                return message;
            }
            // The sender half lives as long as `self`; recv only yields
            // `None` if it is ever dropped externally.
        }
    }

    /// Number of distinct message ids admitted so far.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl Default for DedupQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            from: "alice@example.com".to_string(),
            to: "assistant@example.com".to_string(),
            subject: "Hello".to_string(),
            timestamp: Utc::now(),
            body: "body".to_string(),
        }
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let queue = DedupQueue::new();
        assert!(queue.enqueue(message("a")));
        assert!(queue.enqueue(message("b")));
        assert_eq!(queue.dequeue().await.id, "a");
        assert_eq!(queue.dequeue().await.id, "b");
    }

    #[tokio::test]
    async fn duplicate_ids_are_dropped() {
        let queue = DedupQueue::new();
        assert!(queue.enqueue(message("a")));
        assert!(!queue.enqueue(message("a")));
        assert_eq!(queue.seen_count(), 1);
        assert_eq!(queue.dequeue().await.id, "a");
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let queue = std::sync::Arc::new(DedupQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await.id })
        };
        // Give the waiter a chance to park on the empty queue.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        queue.enqueue(message("late"));
        assert_eq!(waiter.await.unwrap(), "late");
    }
}
