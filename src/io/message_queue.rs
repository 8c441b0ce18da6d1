//! Inbound queue between the transport and the pipeline
//!
//! Holds complete multipart messages in arrival order. A bounded queue either
//! refuses new messages while full or makes room by dropping the oldest one;
//! a detector that keeps streaming usually wants the latter.

use crate::error::{Result, StreamError};
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// One multipart stream message
pub type Multipart = Vec<Bytes>;

/// What a queue does when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    Unbounded,
    /// Refuse new messages while `capacity` are waiting
    Reject { capacity: usize },
    /// Drop the oldest waiting message to make room
    DropOldest { capacity: usize },
}

impl QueuePolicy {
    pub fn capacity(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Reject { capacity } | Self::DropOldest { capacity } => Some(*capacity),
        }
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::Reject { capacity: 1024 }
    }
}

/// Counters of a [`MessageQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub accepted: u64,
    pub delivered: u64,
    /// Refused because the queue was full
    pub rejected: u64,
    /// Evicted to make room for newer messages
    pub dropped: u64,
    pub depth: usize,
    pub high_water: usize,
}

#[derive(Debug)]
struct State {
    tx: Option<mpsc::UnboundedSender<Multipart>>,
    stats: QueueStats,
}

fn closed() -> StreamError {
    StreamError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "message queue closed",
    ))
}

/// Multipart message queue shared by a producer and the pipeline
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use eiger_stream_rust::io::{MessageQueue, QueuePolicy};
///
/// # #[tokio::main]
/// # async fn main() -> eiger_stream_rust::Result<()> {
/// let queue = MessageQueue::new(QueuePolicy::DropOldest { capacity: 2 });
/// for i in 0u8..3 {
///     queue.enqueue(vec![Bytes::from(vec![i])]).await?;
/// }
/// queue.close().await;
///
/// assert_eq!(queue.recv().await, Some(vec![Bytes::from(vec![1u8])]));
/// assert_eq!(queue.stats().await.dropped, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MessageQueue {
    policy: QueuePolicy,
    state: Mutex<State>,
    rx: Mutex<mpsc::UnboundedReceiver<Multipart>>,
}

impl MessageQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            policy,
            state: Mutex::new(State {
                tx: Some(tx),
                stats: QueueStats::default(),
            }),
            rx: Mutex::new(rx),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Add a message without waiting
    ///
    /// Fails once the queue is closed, or when it is full under
    /// [`QueuePolicy::Reject`].
    pub async fn enqueue(&self, parts: Multipart) -> Result<()> {
        let mut state = self.state.lock().await;
        let tx = state.tx.clone().ok_or_else(closed)?;

        if let Some(capacity) = self.policy.capacity() {
            if state.stats.depth >= capacity {
                if let QueuePolicy::Reject { .. } = self.policy {
                    state.stats.rejected += 1;
                    warn!(capacity, "Message queue full, message refused");
                    return Err(StreamError::Io(std::io::Error::new(
                        std::io::ErrorKind::WouldBlock,
                        "message queue full",
                    )));
                }
                // a waiting receiver holds `rx` only while the queue is empty
                if self.rx.lock().await.try_recv().is_ok() {
                    state.stats.depth -= 1;
                    state.stats.dropped += 1;
                    debug!(capacity, "Message queue full, oldest message dropped");
                }
            }
        }

        tx.send(parts).map_err(|_| closed())?;
        let stats = &mut state.stats;
        stats.accepted += 1;
        stats.depth += 1;
        stats.high_water = stats.high_water.max(stats.depth);
        Ok(())
    }

    /// Next message; `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<Multipart> {
        let parts = {
            let mut rx = self.rx.lock().await;
            rx.recv().await?
        };
        self.delivered().await;
        Some(parts)
    }

    /// Next message if one is waiting
    pub async fn try_recv(&self) -> Option<Multipart> {
        let parts = self.rx.lock().await.try_recv().ok()?;
        self.delivered().await;
        Some(parts)
    }

    async fn delivered(&self) {
        let mut state = self.state.lock().await;
        state.stats.delivered += 1;
        state.stats.depth = state.stats.depth.saturating_sub(1);
    }

    /// Refuse further messages; waiting ones can still be received
    pub async fn close(&self) {
        if self.state.lock().await.tx.take().is_some() {
            debug!("Message queue closed");
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.stats.depth
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(id: u8) -> Multipart {
        vec![
            Bytes::from(format!(r#"{{"htype":"dimage-1.0","frame":{}}}"#, id)),
            Bytes::from(vec![id; 4]),
        ]
    }

    #[tokio::test]
    async fn test_arrival_order() {
        let queue = MessageQueue::new(QueuePolicy::Unbounded);
        for id in 0..20 {
            queue.enqueue(frame(id)).await.unwrap();
        }
        assert_eq!(queue.len().await, 20);
        for id in 0..20 {
            assert_eq!(queue.recv().await.unwrap(), frame(id));
        }
        assert!(queue.is_empty().await);
        assert!(queue.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let queue = MessageQueue::new(QueuePolicy::Reject { capacity: 3 });
        for id in 0..3 {
            queue.enqueue(frame(id)).await.unwrap();
        }
        let err = queue.enqueue(frame(3)).await.unwrap_err();
        assert!(matches!(err, StreamError::Io(ref e) if e.kind() == std::io::ErrorKind::WouldBlock));

        queue.recv().await.unwrap();
        queue.enqueue(frame(4)).await.unwrap();
        let stats = queue.stats().await;
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.high_water, 3);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let queue = MessageQueue::new(QueuePolicy::DropOldest { capacity: 4 });
        for id in 0..10 {
            queue.enqueue(frame(id)).await.unwrap();
        }
        assert_eq!(queue.len().await, 4);
        assert_eq!(queue.recv().await.unwrap(), frame(6));

        let stats = queue.stats().await;
        assert_eq!(stats.accepted, 10);
        assert_eq!(stats.dropped, 6);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = MessageQueue::default();
        queue.enqueue(frame(1)).await.unwrap();
        queue.close().await;
        assert!(queue.enqueue(frame(2)).await.is_err());
        assert_eq!(queue.recv().await, Some(frame(1)));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_producer_and_consumer_tasks() {
        let queue = Arc::new(MessageQueue::new(QueuePolicy::Unbounded));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for id in 0..50 {
                    queue.enqueue(frame(id)).await.unwrap();
                    tokio::task::yield_now().await;
                }
                queue.close().await;
            })
        };
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut last = None;
                let mut count = 0;
                while let Some(parts) = queue.recv().await {
                    let id = parts[1][0];
                    assert!(last.map_or(true, |prev| id > prev));
                    last = Some(id);
                    count += 1;
                }
                count
            })
        };

        producer.await.unwrap();
        assert_eq!(consumer.await.unwrap(), 50);
        assert_eq!(queue.stats().await.delivered, 50);
    }
}
