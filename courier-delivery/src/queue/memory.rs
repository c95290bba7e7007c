use std::collections::VecDeque;

use async_trait::async_trait;

use super::RetryQueue;
use crate::{error::QueueError, types::QueuedMessage};

/// In-memory retry queue
///
/// Entries are kept in insertion order. Contents are lost when the process
/// exits.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: parking_lot::Mutex<VecDeque<QueuedMessage>>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryQueue for MemoryQueue {
    async fn push(&self, message: QueuedMessage) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter_mut().find(|entry| entry.id == message.id) {
            *existing = message;
        } else {
            entries.push_back(message);
        }
        drop(entries);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueuedMessage>, QueueError> {
        Ok(self.entries.lock().pop_front())
    }

    async fn peek(&self) -> Result<Option<QueuedMessage>, QueueError> {
        Ok(self.entries.lock().front().cloned())
    }

    async fn get_all(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        Ok(self.entries.lock().iter().cloned().collect())
    }

    async fn remove(&self, id: &str) -> Result<Option<QueuedMessage>, QueueError> {
        let mut entries = self.entries.lock();
        Ok(entries
            .iter()
            .position(|entry| entry.id == id)
            .and_then(|index| entries.remove(index)))
    }

    async fn update(&self, message: QueuedMessage) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let existing = entries
            .iter_mut()
            .find(|entry| entry.id == message.id)
            .ok_or_else(|| QueueError::NotFound(message.id.clone()))?;
        *existing = message;
        drop(entries);
        Ok(())
    }

    async fn size(&self) -> Result<usize, QueueError> {
        Ok(self.entries.lock().len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::SendRequest;

    fn message(id: &str) -> QueuedMessage {
        QueuedMessage::new(
            id.to_string(),
            SendRequest::new("to@example.com", "from@example.com", "Hi", "Body"),
            Duration::ZERO,
            "timed out".to_string(),
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push(message("a")).await.unwrap();
        queue.push(message("b")).await.unwrap();

        assert_eq!(queue.peek().await.unwrap().map(|m| m.id), Some("a".to_string()));
        assert_eq!(queue.pop().await.unwrap().map(|m| m.id), Some("a".to_string()));
        assert_eq!(queue.pop().await.unwrap().map(|m| m.id), Some("b".to_string()));
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_same_id_replaces() {
        let queue = MemoryQueue::new();
        queue.push(message("a")).await.unwrap();

        let mut replacement = message("a");
        replacement.attempts = 2;
        queue.push(replacement.clone()).await.unwrap();

        assert_eq!(queue.size().await.unwrap(), 1);
        assert_eq!(queue.get_all().await.unwrap(), vec![replacement]);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let queue = MemoryQueue::new();
        queue.push(message("a")).await.unwrap();

        let mut updated = message("a");
        updated.attempts = 3;
        queue.update(updated).await.unwrap();
        assert_eq!(queue.peek().await.unwrap().map(|m| m.attempts), Some(3));

        assert!(queue.remove("a").await.unwrap().is_some());
        assert!(queue.remove("a").await.unwrap().is_none());

        let result = queue.update(message("a")).await;
        assert!(matches!(result, Err(QueueError::NotFound(id)) if id == "a"));
    }
}
