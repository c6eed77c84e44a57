//! Unbounded FIFO queue backing pull-style `receive()`.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// A thread-safe unbounded queue with an awaitable pop.
#[derive(Debug)]
pub struct MessageQueue<T> {
    buffer: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> MessageQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Appends an element to the end of the queue and wakes one waiter.
    pub async fn push(&self, element: T) {
        self.buffer.lock().await.push_back(element);
        self.notify.notify_one();
    }

    /// Removes the oldest element, waiting until one is available.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(element) = self.try_pop().await {
                return element;
            }
            self.notify.notified().await;
        }
    }

    /// Removes the oldest element if there is one.
    pub async fn try_pop(&self) -> Option<T> {
        self.buffer.lock().await.pop_front()
    }

    /// Returns the current number of elements in the queue.
    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Returns true if the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }

    /// Clears all elements from the queue.
    pub async fn clear(&self) {
        self.buffer.lock().await.clear();
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MessageQueue::new();

        assert!(queue.is_empty().await);
        queue.push(1).await;
        queue.push(2).await;
        queue.push(3).await;
        assert_eq!(queue.len().await, 3);

        assert_eq!(queue.pop().await, 1);
        assert_eq!(queue.pop().await, 2);
        assert_eq!(queue.try_pop().await, Some(3));
        assert_eq!(queue.try_pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(MessageQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late").await;

        let value = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, "late");
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = MessageQueue::new();
        queue.push(1).await;
        queue.clear().await;
        assert!(queue.is_empty().await);
    }
}
