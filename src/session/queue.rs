//! Inbound event queues and outbound state fan-out.
//!
//! Client requests land on a durable per-session FIFO consumed only by
//! the session's writer process. Outbound updates go through an
//! at-least-once publisher; every update carries the sequence number so
//! subscribers can drop duplicates and stale deliveries.

use crate::core::{SessionId, UserId};
use crate::error::SessionError;
use crate::protocol::{ActionCall, ServerMessage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

/// One client request, as queued for the session's writer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Action {
        user: UserId,
        sequence: u64,
        call: ActionCall,
    },
    /// Re-publish current views; `None` refreshes every seat.
    Refresh { user: Option<UserId> },
    Drag {
        user: UserId,
        key: String,
        x: f64,
        y: f64,
    },
    RequestLock { user: UserId, key: String },
    ReleaseLock { user: UserId, key: String },
}

/// Storage seam for the per-session inbound FIFO.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn push(&self, session: SessionId, event: SessionEvent) -> Result<(), SessionError>;

    /// Pop the oldest event, waiting up to `timeout`. `Ok(None)` on
    /// timeout; callers use the gap to check their liveness flag.
    ///
    /// The runner races this future against engine updates and drops
    /// it when the other side wins first, so implementations must be
    /// cancel-safe: an event may leave the queue only in the poll
    /// that returns it. A backend whose blocking pop dequeues
    /// server-side before the response arrives needs an ack or
    /// re-queue step on top.
    async fn pop(
        &self,
        session: SessionId,
        timeout: Duration,
    ) -> Result<Option<SessionEvent>, SessionError>;
}

/// In-memory queue for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryEventQueue {
    queues: Mutex<HashMap<SessionId, VecDeque<SessionEvent>>>,
    notify: Notify,
}

impl MemoryEventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, session: SessionId) -> Option<SessionEvent> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(&session)?
            .pop_front()
    }
}

#[async_trait]
impl EventQueue for MemoryEventQueue {
    async fn push(&self, session: SessionId, event: SessionEvent) -> Result<(), SessionError> {
        self.queues
            .lock()
            .unwrap()
            .entry(session)
            .or_default()
            .push_back(event);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(
        &self,
        session: SessionId,
        timeout: Duration,
    ) -> Result<Option<SessionEvent>, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop(session) {
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// Who an outbound update is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    All,
    /// One seat, 0-based.
    Player(usize),
}

/// One outbound update, tagged with the committed sequence at send
/// time. Delivery is at-least-once; subscribers de-duplicate on
/// `(session, sequence, message)`.
#[derive(Clone, Debug)]
pub struct SessionUpdate {
    pub session: SessionId,
    pub sequence: u64,
    pub to: Recipient,
    pub message: ServerMessage,
}

/// Seam for the outbound pub/sub fan-out.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish(&self, update: SessionUpdate) -> Result<(), SessionError>;
}

/// In-memory broadcast publisher. Subscribers that lag are dropped by
/// the channel; that is acceptable for an at-least-once hint stream
/// where a `refresh` recovers the current state.
#[derive(Debug)]
pub struct MemoryPublisher {
    channels: Mutex<HashMap<SessionId, broadcast::Sender<SessionUpdate>>>,
    capacity: usize,
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryPublisher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a session's update stream.
    pub fn subscribe(&self, session: SessionId) -> broadcast::Receiver<SessionUpdate> {
        self.channels
            .lock()
            .unwrap()
            .entry(session)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

#[async_trait]
impl StatePublisher for MemoryPublisher {
    async fn publish(&self, update: SessionUpdate) -> Result<(), SessionError> {
        let sender = self
            .channels
            .lock()
            .unwrap()
            .entry(update.session)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        // no subscribers yet is not an error
        let _ = sender.send(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SessionId = SessionId(1);

    #[tokio::test]
    async fn test_queue_fifo_order() {
        let queue = MemoryEventQueue::new();
        queue
            .push(S, SessionEvent::Refresh { user: None })
            .await
            .unwrap();
        queue
            .push(
                S,
                SessionEvent::RequestLock {
                    user: UserId(1),
                    key: "$el(1)".to_string(),
                },
            )
            .await
            .unwrap();

        let first = queue.pop(S, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, Some(SessionEvent::Refresh { user: None }));
        let second = queue.pop(S, Duration::from_millis(10)).await.unwrap();
        assert!(matches!(second, Some(SessionEvent::RequestLock { .. })));
    }

    #[tokio::test]
    async fn test_pop_times_out_empty() {
        let queue = MemoryEventQueue::new();
        let popped = queue.pop(S, Duration::from_millis(10)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        use std::sync::Arc;
        let queue = Arc::new(MemoryEventQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(S, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        queue
            .push(S, SessionEvent::Refresh { user: None })
            .await
            .unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped, Some(SessionEvent::Refresh { user: None }));
    }

    #[tokio::test]
    async fn test_cancelled_pop_never_consumes_an_event() {
        let queue = MemoryEventQueue::new();

        // a pop dropped mid-wait takes nothing with it
        let aborted =
            tokio::time::timeout(Duration::ZERO, queue.pop(S, Duration::from_secs(5))).await;
        assert!(aborted.is_err());

        queue
            .push(S, SessionEvent::Refresh { user: None })
            .await
            .unwrap();

        // with an event queued, the pop completes within a single poll
        let popped =
            tokio::time::timeout(Duration::ZERO, queue.pop(S, Duration::from_secs(5))).await;
        assert_eq!(
            popped.unwrap().unwrap(),
            Some(SessionEvent::Refresh { user: None })
        );
    }

    #[tokio::test]
    async fn test_queues_are_per_session() {
        let queue = MemoryEventQueue::new();
        queue
            .push(S, SessionEvent::Refresh { user: None })
            .await
            .unwrap();

        let other = queue
            .pop(SessionId(2), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(other, None);
        assert!(queue.pop(S, Duration::from_millis(10)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_publisher_fans_out_to_subscribers() {
        let publisher = MemoryPublisher::default();
        let mut rx1 = publisher.subscribe(S);
        let mut rx2 = publisher.subscribe(S);

        publisher
            .publish(SessionUpdate {
                session: S,
                sequence: 4,
                to: Recipient::All,
                message: ServerMessage::Pong,
            })
            .await
            .unwrap();

        assert_eq!(rx1.recv().await.unwrap().sequence, 4);
        assert_eq!(rx2.recv().await.unwrap().sequence, 4);
    }
}
