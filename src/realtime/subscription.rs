//! Subscription handle: one consumer's lazy view of a channel's future events.
//!
//! A [Subscription] is a [Stream] of `Result<P, RealtimeError>`:
//!
//! - `Some(Ok(event))` for each event, in publish order;
//! - `Some(Err(RealtimeError::Backpressure { .. }))` once, after the queued
//!   events, if the queue cap was exceeded;
//! - `None` once the subscription is cancelled, dropped by the hub, or closed.
//!
//! Cancelling (via [Subscription::cancel], [ChannelHub::unsubscribe] or
//! dropping the handle) ends the stream immediately, even if events are still
//! queued. The stream is not restartable.
//!
//! [ChannelHub::unsubscribe]: super::hub::ChannelHub::unsubscribe

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::RealtimeError;
use super::hub::{Channel, Payload};

/// Hub-assigned subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State shared between the hub's delivery slot and the consumer's handle.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionShared {
    cancelled: AtomicBool,
    queued: AtomicUsize,
    failure: Mutex<Option<RealtimeError>>,
}

impl SubscriptionShared {
    pub(crate) fn close(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Must be called before the event is sent so the consumer never
    /// decrements below zero.
    pub(crate) fn enqueued(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    fn dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn fail(&self, error: RealtimeError) {
        *self.failure.lock() = Some(error);
    }

    fn take_failure(&self) -> Option<RealtimeError> {
        self.failure.lock().take()
    }
}

/// A consumer's handle on one channel. Exactly one task should poll it.
pub struct Subscription<P: Payload> {
    id: SubscriptionId,
    channel: String,
    receiver: mpsc::UnboundedReceiver<P>,
    shared: Arc<SubscriptionShared>,
    owner: Weak<Channel<P>>,
    finished: bool,
}

impl<P: Payload> Subscription<P> {
    pub(crate) fn new(
        id: SubscriptionId,
        channel: &Arc<Channel<P>>,
        receiver: mpsc::UnboundedReceiver<P>,
        shared: Arc<SubscriptionShared>,
    ) -> Self {
        Self {
            id,
            channel: channel.name().to_string(),
            receiver,
            shared,
            owner: Arc::downgrade(channel),
            finished: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Name of the channel this subscription is bound to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stop receiving events. Idempotent; returns `false` if the subscription
    /// was no longer registered with its channel.
    pub fn cancel(&self) -> bool {
        match self.owner.upgrade() {
            Some(channel) => channel.remove(self.id),
            None => {
                self.shared.close();
                false
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Number of events queued but not yet consumed.
    pub fn pending(&self) -> usize {
        self.shared.queued()
    }
}

impl<P: Payload> Unpin for Subscription<P> {}

impl<P: Payload> Stream for Subscription<P> {
    type Item = Result<P, RealtimeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.shared.is_cancelled() {
            this.finished = true;
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.shared.dequeued();
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(this.shared.take_failure().map(Err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<P: Payload> Drop for Subscription<P> {
    fn drop(&mut self) {
        if let Some(channel) = self.owner.upgrade() {
            channel.remove(self.id);
        }
    }
}

impl<P: Payload> fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("pending", &self.pending())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::{FutureExt, StreamExt};

    use super::super::hub::ChannelHub;
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u8);

    impl Payload for Ping {
        fn kind(&self) -> &'static str {
            "ping"
        }
    }

    #[tokio::test]
    async fn test_pending_tracks_queue_depth() {
        let hub: ChannelHub<Ping> = ChannelHub::builder().build();
        let mut sub = hub.subscribe("pings");
        assert_eq!(sub.pending(), 0);

        hub.publish("pings", Ping(1)).unwrap();
        hub.publish("pings", Ping(2)).unwrap();
        assert_eq!(sub.pending(), 2);

        assert_eq!(sub.next().await, Some(Ok(Ping(1))));
        assert_eq!(sub.pending(), 1);
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_events() {
        let hub: ChannelHub<Ping> = ChannelHub::builder().build();
        let mut sub = hub.subscribe("pings");
        hub.publish("pings", Ping(1)).unwrap();

        assert!(sub.cancel());
        assert!(sub.is_cancelled());
        assert_eq!(sub.next().await, None);
        // Not restartable.
        hub.publish("pings", Ping(2)).unwrap();
        assert_eq!(sub.next().now_or_never(), Some(None));
    }

    #[tokio::test]
    async fn test_outlives_hub() {
        let hub: ChannelHub<Ping> = ChannelHub::builder().build();
        let mut sub = hub.subscribe("pings");
        hub.publish("pings", Ping(9)).unwrap();
        drop(hub);

        assert_eq!(sub.next().await, Some(Ok(Ping(9))));
        assert_eq!(sub.next().await, None);
        assert!(!sub.cancel());
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId::new(42).to_string(), "42");
        assert_eq!(SubscriptionId::new(42).as_u64(), 42);
    }
}
