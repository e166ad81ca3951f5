//! In-memory channel-scoped pub/sub with bounded per-subscriber queues.
//!
//! Channels carry no state of their own: a channel exists only while it has
//! subscribers. Each subscriber owns one bounded queue; publishing is a
//! snapshot of the channel's subscriber list followed by a non-blocking
//! enqueue per subscriber. A full queue means that envelope is dropped for
//! that subscriber only - slow consumers never back-pressure the publisher
//! or starve their siblings.
//!
//! # Thread Safety
//!
//! The subscriber map sits behind an `RwLock`: `publish` takes the read
//! lock only to snapshot the list, `subscribe`/`unsubscribe` take the write
//! lock. The lock is never held across an await point.
//!
//! # Publish vs. Unsubscribe
//!
//! A publish snapshot can race with a subscriber disconnecting. The queues
//! are `tokio::sync::mpsc` bounded channels, so a send into a queue whose
//! receiver is gone fails with a recoverable error that the publisher
//! treats as a no-op. No publish can panic, block, or deliver into a
//! revived queue.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of each subscriber's envelope queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

/// One live subscription: the receiving half of a bounded envelope queue.
///
/// Obtained from [`EventBroker::subscribe`]. When the broker unsubscribes
/// this subscriber (or drops the whole channel), the queue closes and
/// [`Subscriber::recv`] yields `None` after the remaining buffered
/// envelopes drain.
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    channel: String,
    events: mpsc::Receiver<Bytes>,
}

impl Subscriber {
    /// The broker-assigned subscriber id, used to unsubscribe.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The channel this subscriber listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receives the next envelope, or `None` once the queue is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.events.recv().await
    }

    /// Polls for the next envelope; for wiring the queue into a `Stream`.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.events.poll_recv(cx)
    }
}

/// Channel-scoped pub/sub registry.
#[derive(Debug, Default)]
pub struct EventBroker {
    subscribers: RwLock<HashMap<String, Vec<(u64, mpsc::Sender<Bytes>)>>>,
    next_id: AtomicU64,
}

impl EventBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber on `channel` and returns its queue.
    pub fn subscribe(&self, channel: &str) -> Subscriber {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers
            .entry(channel.to_string())
            .or_default()
            .push((id, sender));

        Subscriber {
            id,
            channel: channel.to_string(),
            events: receiver,
        }
    }

    /// Removes a subscriber from `channel` and closes its queue.
    ///
    /// Dropping the queue's send half is the closure: the reader observes
    /// end-of-stream once buffered envelopes drain. Unsubscribing an
    /// unknown id (or the same id twice) is a no-op. A channel whose
    /// subscriber list becomes empty is dropped from the map.
    pub fn unsubscribe(&self, channel: &str, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = subscribers.get_mut(channel) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subscribers.remove(channel);
            }
        }
    }

    /// Publishes envelope bytes to every current subscriber of `channel`.
    ///
    /// Best-effort delivery: each enqueue is non-blocking, and a full or
    /// closed queue drops the envelope for that subscriber only. Returns
    /// the number of queues the envelope was actually placed on.
    pub fn publish(&self, channel: &str, data: &Bytes) -> usize {
        let snapshot: Vec<mpsc::Sender<Bytes>> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match subscribers.get(channel) {
                Some(list) => list.iter().map(|(_, sender)| sender.clone()).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for sender in snapshot {
            if sender.try_send(data.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }
}
