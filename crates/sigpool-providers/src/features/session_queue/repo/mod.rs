use async_trait::async_trait;
use sigpool_core::{CoreError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// A received queue message. The receipt handle is only valid for the
/// receive that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub receive_count: u32,
}

/// Queue with at-least-once delivery. Received messages stay hidden for the
/// visibility timeout and reappear unless acknowledged before it elapses.
#[async_trait]
pub trait SessionQueueRepository: Send + Sync {
    async fn send(&self, body: String) -> Result<String>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>>;

    /// Remove a message. Returns false when the receipt is stale or unknown.
    async fn acknowledge(&self, receipt_handle: &str) -> Result<bool>;

    /// Messages still held by the queue, visible or not.
    async fn len(&self) -> usize;
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

#[derive(Clone)]
pub struct InMemorySessionQueue {
    messages: Arc<Mutex<VecDeque<StoredMessage>>>,
    arrivals: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemorySessionQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            messages: Arc::new(Mutex::new(VecDeque::new())),
            arrivals: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    async fn take_visible(&self, max_messages: usize) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let mut received = Vec::new();

        for stored in messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            stored.receipt_handle = Some(receipt.clone());
            stored.invisible_until = Some(now + self.visibility_timeout);
            stored.receive_count += 1;

            received.push(QueueMessage {
                message_id: stored.message_id.clone(),
                receipt_handle: receipt,
                body: stored.body.clone(),
                receive_count: stored.receive_count,
            });
        }

        received
    }
}

impl Default for InMemorySessionQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SessionQueueRepository for InMemorySessionQueue {
    async fn send(&self, body: String) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        {
            let mut messages = self.messages.lock().await;
            messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body,
                receipt_handle: None,
                invisible_until: None,
                receive_count: 0,
            });
        }
        self.arrivals.notify_one();
        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        if max_messages == 0 {
            return Err(CoreError::QueueError(
                "max_messages must be at least 1".to_string(),
            ));
        }

        let deadline = Instant::now() + wait;
        loop {
            let received = self.take_visible(max_messages).await;
            if !received.is_empty() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // Woken early by a send; otherwise give up at the deadline.
            let _ = tokio::time::timeout(deadline - now, self.arrivals.notified()).await;
        }
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<bool> {
        let mut messages = self.messages.lock().await;
        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle));

        match position {
            Some(index) => {
                messages.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_acknowledge() {
        let queue = InMemorySessionQueue::new(Duration::from_secs(30));
        queue.send("one".to_string()).await.unwrap();

        let received = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "one");
        assert_eq!(received[0].receive_count, 1);

        assert!(queue.acknowledge(&received[0].receipt_handle).await.unwrap());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_receive_respects_batch_size_and_order() {
        let queue = InMemorySessionQueue::default();
        for i in 0..5 {
            queue.send(format!("m{i}")).await.unwrap();
        }

        let received = queue.receive(3, Duration::ZERO).await.unwrap();
        let bodies: Vec<_> = received.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);

        let rest = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_message_reappears_after_visibility_timeout() {
        let queue = InMemorySessionQueue::new(Duration::from_secs(30));
        queue.send("retry-me".to_string()).await.unwrap();

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        let hidden = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(hidden.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;

        let again = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message_id, first[0].message_id);
        assert_eq!(again[0].receive_count, 2);
        assert_ne!(again[0].receipt_handle, first[0].receipt_handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_receipt_does_not_remove_redelivered_message() {
        let queue = InMemorySessionQueue::new(Duration::from_secs(5));
        queue.send("m".to_string()).await.unwrap();

        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let second = queue.receive(1, Duration::ZERO).await.unwrap();

        assert!(!queue.acknowledge(&first[0].receipt_handle).await.unwrap());
        assert_eq!(queue.len().await, 1);
        assert!(queue.acknowledge(&second[0].receipt_handle).await.unwrap());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_waits_up_to_bound_when_empty() {
        let queue = InMemorySessionQueue::default();
        let started = Instant::now();

        let received = queue.receive(10, Duration::from_secs(2)).await.unwrap();

        assert!(received.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_wakes_on_send() {
        let queue = InMemorySessionQueue::default();
        let sender = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sender.send("late".to_string()).await.unwrap();
        });

        let started = Instant::now();
        let received = queue.receive(10, Duration::from_secs(20)).await.unwrap();

        assert_eq!(received.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_zero_batch_rejected() {
        let queue = InMemorySessionQueue::default();
        assert!(queue.receive(0, Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_receipt_is_not_an_error() {
        let queue = InMemorySessionQueue::default();
        assert!(!queue.acknowledge("missing").await.unwrap());
    }
}
