//! Bounded task queue
//!
//! [`TaskQueue`] is the contract the node relies on: an enqueue that can
//! fail with a distinguished "full" condition and a depth for load
//! reporting. [`BoundedQueue`] is the in-process implementation.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// How enqueue behaves when the queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Fail fast with QueueFull
    Immediate,
    /// Wait for space until cancelled
    Wait,
}

/// One unit of queued work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub producer_id: String,
    pub data: serde_json::Value,
}

impl TaskItem {
    pub fn new(producer_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            producer_id: producer_id.into(),
            data,
        }
    }
}

/// Queue contract consumed by the bucket registry and fill
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add an item. Only `Error::QueueFull` triggers overflow forwarding.
    async fn enqueue(&self, priority: Priority, item: TaskItem, cancel: &CancellationToken) -> Result<()>;

    /// Current number of queued items
    fn depth(&self) -> usize;

    /// Maximum number of queued items
    fn capacity(&self) -> usize;

    /// Pop the oldest item without waiting
    fn try_take(&self) -> Option<TaskItem>;

    /// Pop the oldest item, waiting until one arrives or `cancel` fires
    async fn take(&self, cancel: &CancellationToken) -> Result<TaskItem>;
}

/// FIFO queue with a fixed capacity
pub struct BoundedQueue {
    name: String,
    capacity: usize,
    items: Mutex<VecDeque<TaskItem>>,
    /// Signalled when an item is removed
    space: Notify,
    /// Signalled when an item is added
    ready: Notify,
}

impl BoundedQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            space: Notify::new(),
            ready: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn try_push(&self, item: TaskItem) -> std::result::Result<(), TaskItem> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.ready.notify_one();
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for BoundedQueue {
    async fn enqueue(&self, priority: Priority, item: TaskItem, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut item = item;
        loop {
            item = match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => rejected,
            };

            if priority == Priority::Immediate {
                return Err(Error::queue_full(&self.name));
            }

            tokio::select! {
                _ = self.space.notified() => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    fn depth(&self) -> usize {
        self.items.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn try_take(&self) -> Option<TaskItem> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    async fn take(&self, cancel: &CancellationToken) -> Result<TaskItem> {
        loop {
            if let Some(item) = self.try_take() {
                return Ok(item);
            }

            tokio::select! {
                _ = self.ready.notified() => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn item(n: u64) -> TaskItem {
        TaskItem::new("producer", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_immediate_fails_when_full() {
        let queue = BoundedQueue::new("resize", 2);
        let cancel = CancellationToken::new();

        queue.enqueue(Priority::Immediate, item(1), &cancel).await.unwrap();
        queue.enqueue(Priority::Immediate, item(2), &cancel).await.unwrap();
        let err = queue.enqueue(Priority::Immediate, item(3), &cancel).await.unwrap_err();

        assert!(err.is_queue_full());
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.capacity(), 2);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new("resize", 4);
        let cancel = CancellationToken::new();
        for n in 0..3 {
            queue.enqueue(Priority::Immediate, item(n), &cancel).await.unwrap();
        }

        assert_eq!(queue.try_take(), Some(item(0)));
        assert_eq!(queue.take(&cancel).await.unwrap(), item(1));
        assert_eq!(queue.try_take(), Some(item(2)));
        assert_eq!(queue.try_take(), None);
    }

    #[tokio::test]
    async fn test_cancelled_token_rejects_enqueue() {
        let queue = BoundedQueue::new("resize", 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = queue.enqueue(Priority::Immediate, item(1), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_wait_resumes_when_space_frees() {
        let queue = Arc::new(BoundedQueue::new("resize", 1));
        let cancel = CancellationToken::new();
        queue.enqueue(Priority::Immediate, item(1), &cancel).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.enqueue(Priority::Wait, item(2), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.try_take(), Some(item(1)));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(queue.try_take(), Some(item(2)));
    }

    #[tokio::test]
    async fn test_wait_honors_cancellation() {
        let queue = BoundedQueue::new("resize", 1);
        let cancel = CancellationToken::new();
        queue.enqueue(Priority::Immediate, item(1), &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = queue.enqueue(Priority::Wait, item(2), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_take_honors_cancellation() {
        let queue = BoundedQueue::new("resize", 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(queue.take(&cancel).await, Err(Error::Cancelled)));
    }
}
