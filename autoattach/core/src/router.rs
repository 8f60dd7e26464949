//! Message Router
//!
//! Splits the single inbound stream into its two consumers:
//!
//! ```text
//!                        ┌──── Event ───► event queue ───► EventDispatcher
//! FrameReader ─► route ──┤
//!                        └──── Reply ───► PendingReplies ─► ControlClient waiter
//! ```
//!
//! The router runs as one background task per connection. It is the only
//! reader of the socket, and it never blocks on its consumers: the event
//! queue is unbounded and reply delivery is a one-shot send. That matters
//! because the dispatcher re-attaches (and so waits on replies) while events
//! keep arriving.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};

use crate::messages::{Event, Message, Reply};
use crate::transport::frame::FrameReader;
use crate::transport::ControlError;

/// Receiving end of the event queue
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Table of commands awaiting a reply, keyed by command id
///
/// Shared between the [`ControlClient`](crate::client::ControlClient), which
/// registers waiters, and the [`MessageRouter`], which completes them.
#[derive(Clone, Debug, Default)]
pub struct PendingReplies {
    inner: Arc<Mutex<PendingInner>>,
}

#[derive(Debug, Default)]
struct PendingInner {
    waiters: BTreeMap<u64, oneshot::Sender<Reply>>,
    closed: bool,
}

impl PendingReplies {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for command `id`
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ConnectionLost` once the router has stopped,
    /// since no reply could ever be delivered.
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<Reply>, ControlError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(ControlError::ConnectionLost);
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Drop the waiter for `id` (timeout or failed write)
    pub fn cancel(&self, id: u64) {
        self.inner.lock().waiters.remove(&id);
    }

    /// Deliver a reply to its waiter
    ///
    /// A reply without an id goes to the oldest outstanding command, which
    /// matches the service's in-order replies. Returns `false` if no waiter
    /// claimed it.
    pub fn complete(&self, reply: Reply) -> bool {
        let waiter = {
            let mut inner = self.inner.lock();
            match reply.id {
                Some(id) => inner.waiters.remove(&id),
                None => inner.waiters.pop_first().map(|(_, tx)| tx),
            }
        };

        match waiter {
            // Err means the caller gave up (timeout) between lookup and send
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Fail every outstanding waiter and refuse new ones
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        // Dropping the senders wakes each receiver with an error
        inner.waiters.clear();
    }

    /// Number of commands still awaiting a reply
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Whether no command is awaiting a reply
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the router did with one message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued for the event dispatcher
    Event,
    /// Handed to the waiting command
    Reply,
    /// Dropped: unknown shape, unmatched reply, or no event consumer
    Dropped,
}

/// Classifies inbound messages and delivers them
pub struct MessageRouter {
    pending: PendingReplies,
    events: mpsc::UnboundedSender<Event>,
}

impl MessageRouter {
    /// Create a router and the event queue it feeds
    ///
    /// The returned receiver is the queue's only consumer.
    #[must_use]
    pub fn new(pending: PendingReplies) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { pending, events }, rx)
    }

    /// Route a single decoded value
    pub fn route(&self, value: Value) -> RouteOutcome {
        match Message::classify(value) {
            Message::Event(event) => {
                tracing::debug!(method = %event.method, "Event received");
                if self.events.send(event).is_err() {
                    tracing::debug!("Event receiver dropped");
                    return RouteOutcome::Dropped;
                }
                RouteOutcome::Event
            }
            Message::Reply(reply) => {
                let id = reply.id;
                let code = reply.code;
                if self.pending.complete(reply) {
                    tracing::trace!(id = ?id, code, "Reply delivered");
                    RouteOutcome::Reply
                } else {
                    tracing::warn!(id = ?id, code, "Reply matches no pending command");
                    RouteOutcome::Dropped
                }
            }
            Message::Unrecognized(value) => {
                tracing::warn!(raw = %value, "Dropping message with neither method nor code");
                RouteOutcome::Dropped
            }
        }
    }

    /// Consume messages until the connection fails
    ///
    /// Always returns an error: the stream has no clean end. Before
    /// returning, every pending command is failed and the event queue is
    /// closed so nobody waits forever.
    pub async fn run<R: AsyncRead + Unpin>(self, mut reader: FrameReader<R>) -> ControlError {
        let err = loop {
            match reader.read_message().await {
                Ok(value) => {
                    self.route(value);
                }
                Err(e) => break e,
            }
        };

        tracing::warn!(error = %err, "Message router stopped");
        self.pending.close();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_route_event_and_reply() {
        let pending = PendingReplies::new();
        let (router, mut events) = MessageRouter::new(pending.clone());
        let mut waiter = pending.register(0).unwrap();

        assert_eq!(router.route(json!({"method": "detached"})), RouteOutcome::Event);
        assert_eq!(router.route(json!({"id": 0, "code": 0})), RouteOutcome::Reply);

        assert_eq!(events.try_recv().unwrap().method, "detached");
        assert_eq!(waiter.try_recv().unwrap().code, 0);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_alternating_messages_keep_per_queue_order() {
        let pending = PendingReplies::new();
        let (router, mut events) = MessageRouter::new(pending.clone());

        let mut waiters: Vec<_> = (0..5).map(|id| pending.register(id).unwrap()).collect();

        for i in 0..5u64 {
            router.route(json!({"method": format!("event-{i}")}));
            router.route(json!({"id": i, "code": i}));
        }

        for i in 0..5u64 {
            assert_eq!(events.try_recv().unwrap().method, format!("event-{i}"));
        }
        assert!(events.try_recv().is_err());

        for (i, waiter) in waiters.iter_mut().enumerate() {
            let reply = waiter.try_recv().unwrap();
            assert_eq!(reply.id, Some(i as u64));
            assert_eq!(reply.code, i as i64);
        }
    }

    #[test]
    fn test_out_of_order_replies_reach_their_waiters() {
        let pending = PendingReplies::new();
        let (router, _events) = MessageRouter::new(pending.clone());

        let mut first = pending.register(0).unwrap();
        let mut second = pending.register(1).unwrap();

        router.route(json!({"id": 1, "code": 5}));
        router.route(json!({"id": 0, "code": 0}));

        assert_eq!(first.try_recv().unwrap().code, 0);
        assert_eq!(second.try_recv().unwrap().code, 5);
    }

    #[test]
    fn test_reply_without_id_completes_oldest() {
        let pending = PendingReplies::new();
        let (router, _events) = MessageRouter::new(pending.clone());

        let mut first = pending.register(3).unwrap();
        let mut second = pending.register(4).unwrap();

        router.route(json!({"code": 0}));

        assert_eq!(first.try_recv().unwrap().code, 0);
        assert!(second.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_malformed_replies_still_complete_a_waiter() {
        let pending = PendingReplies::new();
        let (router, _events) = MessageRouter::new(pending.clone());

        let mut string_code = pending.register(0).unwrap();
        let mut float_code = pending.register(1).unwrap();
        let mut string_id = pending.register(2).unwrap();

        assert_eq!(router.route(json!({"id": 0, "code": "0"})), RouteOutcome::Reply);
        assert_eq!(router.route(json!({"id": 1, "code": 1.0})), RouteOutcome::Reply);
        // Unusable id falls back to the oldest waiter
        assert_eq!(router.route(json!({"id": "2", "code": 0})), RouteOutcome::Reply);

        assert!(!string_code.try_recv().unwrap().is_success());
        assert!(!float_code.try_recv().unwrap().is_success());
        assert!(string_id.try_recv().unwrap().is_success());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unmatched_and_unrecognized_are_dropped() {
        let pending = PendingReplies::new();
        let (router, mut events) = MessageRouter::new(pending);

        assert_eq!(router.route(json!({"id": 9, "code": 0})), RouteOutcome::Dropped);
        assert_eq!(router.route(json!({"hello": "world"})), RouteOutcome::Dropped);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_close_fails_waiters_and_rejects_new_ones() {
        let pending = PendingReplies::new();
        let mut waiter = pending.register(0).unwrap();

        pending.close();

        assert!(matches!(
            waiter.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(matches!(pending.register(1), Err(ControlError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_run_routes_until_eof() {
        let mock = tokio_test::io::Builder::new()
            .read(br#"{"method":"detached"}{"id":0,"#)
            .read(br#""code":0}"#)
            .build();

        let pending = PendingReplies::new();
        let waiter = pending.register(0).unwrap();
        let (router, mut events) = MessageRouter::new(pending.clone());

        let err = router.run(FrameReader::new(mock)).await;

        assert!(matches!(err, ControlError::ConnectionLost));
        assert_eq!(events.recv().await.unwrap().method, "detached");
        // Router dropped its sender, so the queue is now closed
        assert!(events.recv().await.is_none());
        assert_eq!(waiter.await.unwrap().code, 0);
        assert!(matches!(pending.register(1), Err(ControlError::ConnectionLost)));
    }
}
