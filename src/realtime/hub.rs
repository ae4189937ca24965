//! Channel hub: a process-wide registry of named, typed broadcast channels.
//!
//! Publishers hand an event to [ChannelHub::publish]; the hub clones it onto
//! the queue of every [Subscription] currently bound to that channel, in the
//! order the subscriptions were created. Enqueueing never waits on a consumer,
//! so a slow subscriber cannot hold up the publisher or its siblings.
//!
//! Each channel carries exactly one payload kind. Kinds are either declared up
//! front through [ChannelHubBuilder::channel] or pinned by the first payload
//! published on an undeclared channel.
//!
//! Locking: the channel map sits behind one `RwLock` that is only held for
//! lookup/insert. Each channel has its own `Mutex` serializing subscribe,
//! unsubscribe and publish for that channel. Publishing enqueues while holding
//! the channel lock; the queues are unbounded mpsc channels so this never
//! blocks, and it keeps every subscriber's view in the same publish order.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::error::RealtimeError;
use super::subscription::{Subscription, SubscriptionId, SubscriptionShared};

/// An event type that can travel through the hub.
///
/// `kind` names the payload shape (e.g. `"createdLink"`); a channel only
/// accepts payloads of the kind it was declared or first published with.
pub trait Payload: Clone + Send + Sync + 'static {
    fn kind(&self) -> &'static str;
}

/// Hub-wide settings.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Maximum number of undelivered events per subscription.
    /// `None` leaves queues bounded only by memory.
    pub queue_cap: Option<usize>,
}

/// Builder for [ChannelHub]: declare channel contracts, then [build](Self::build).
pub struct ChannelHubBuilder<P> {
    contracts: HashMap<String, &'static str>,
    config: HubConfig,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> ChannelHubBuilder<P> {
    /// Declare that `name` carries payloads of `kind`.
    pub fn channel(mut self, name: impl Into<String>, kind: &'static str) -> Self {
        self.contracts.insert(name.into(), kind);
        self
    }

    /// Cap each subscription's queue (`None` = unbounded).
    pub fn queue_cap(mut self, cap: Option<usize>) -> Self {
        self.config.queue_cap = cap;
        self
    }

    pub fn build(self) -> ChannelHub<P> {
        ChannelHub {
            channels: RwLock::new(HashMap::new()),
            contracts: self.contracts,
            config: self.config,
            next_subscription_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }
}

/// Process-wide publish/subscribe hub. Share it as `Arc<ChannelHub<P>>`.
pub struct ChannelHub<P: Payload> {
    channels: RwLock<HashMap<String, Arc<Channel<P>>>>,
    contracts: HashMap<String, &'static str>,
    config: HubConfig,
    next_subscription_id: AtomicU64,
    shut_down: AtomicBool,
}

impl<P: Payload> ChannelHub<P> {
    pub fn builder() -> ChannelHubBuilder<P> {
        ChannelHubBuilder {
            contracts: HashMap::new(),
            config: HubConfig::default(),
            _payload: PhantomData,
        }
    }

    /// Queue `payload` for every subscription currently bound to `channel`.
    ///
    /// Returns how many subscriptions the event was queued for. Fails only when
    /// the payload kind does not match the channel, in which case nothing is
    /// delivered.
    pub fn publish(&self, channel: &str, payload: P) -> Result<usize, RealtimeError> {
        if self.shut_down.load(Ordering::Acquire) {
            debug!(channel, "hub is shut down, publish ignored");
            return Ok(0);
        }

        let delivered = self.channel(channel).deliver(payload, self.config.queue_cap)?;
        trace!(channel, delivered, "event published");
        Ok(delivered)
    }

    /// Open a new subscription on `channel`. It only sees events published
    /// after this call returns.
    pub fn subscribe(&self, channel: &str) -> Subscription<P> {
        let id = SubscriptionId::new(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let channel = self.channel(channel);
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(SubscriptionShared::default());

        {
            let mut state = channel.state.lock();
            if self.shut_down.load(Ordering::Acquire) {
                debug!(channel = %channel.name, subscription_id = %id, "hub is shut down, subscription starts closed");
                drop(sender);
            } else {
                state.subscribers.push(Subscriber {
                    id,
                    sender,
                    shared: Arc::clone(&shared),
                });
                debug!(
                    channel = %channel.name,
                    subscription_id = %id,
                    subscribers = state.subscribers.len(),
                    "subscription created"
                );
            }
        }

        Subscription::new(id, &channel, receiver, shared)
    }

    /// Remove `subscription` from its channel and wake its consumer with the
    /// closed signal. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription<P>) -> bool {
        let channel = self.channels.read().get(subscription.channel()).cloned();
        match channel {
            Some(channel) => channel.remove(subscription.id()),
            None => false,
        }
    }

    /// Number of subscriptions currently bound to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(|c| c.state.lock().subscribers.len())
            .unwrap_or(0)
    }

    /// Names of every channel created so far.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every subscription. Events already queued stay readable; after
    /// that each stream ends. Later publishes are ignored and later
    /// subscriptions start closed.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let channels: Vec<Arc<Channel<P>>> = self.channels.read().values().cloned().collect();
        let closed: usize = channels.iter().map(|c| c.close_all()).sum();
        info!(channels = channels.len(), subscriptions = closed, "Channel hub shut down");
    }

    fn channel(&self, name: &str) -> Arc<Channel<P>> {
        if let Some(channel) = self.channels.read().get(name) {
            return Arc::clone(channel);
        }

        let mut channels = self.channels.write();
        let channel = channels.entry(name.to_string()).or_insert_with(|| {
            let kind = self.contracts.get(name).copied();
            debug!(channel = name, kind = ?kind, "channel created");
            Arc::new(Channel::new(name, kind))
        });
        Arc::clone(channel)
    }
}

/// One named channel and its delivery list.
pub(crate) struct Channel<P> {
    name: String,
    state: Mutex<ChannelState<P>>,
}

struct ChannelState<P> {
    kind: Option<&'static str>,
    subscribers: Vec<Subscriber<P>>,
}

struct Subscriber<P> {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<P>,
    shared: Arc<SubscriptionShared>,
}

impl<P> Channel<P> {
    fn new(name: &str, kind: Option<&'static str>) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ChannelState {
                kind,
                subscribers: Vec::new(),
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Detach one subscription and mark it cancelled. Dropping its sender
    /// wakes a consumer parked on the queue.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            match state.subscribers.iter().position(|s| s.id == id) {
                Some(index) => Some(state.subscribers.remove(index)),
                None => None,
            }
        };

        match removed {
            Some(subscriber) => {
                subscriber.shared.close();
                debug!(channel = %self.name, subscription_id = %id, "subscription removed");
                true
            }
            None => false,
        }
    }

    /// Drop every sender without cancelling, so consumers drain what is queued.
    fn close_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.subscribers.len();
        state.subscribers.clear();
        count
    }
}

impl<P: Payload> Channel<P> {
    fn deliver(&self, payload: P, cap: Option<usize>) -> Result<usize, RealtimeError> {
        let mut state = self.state.lock();

        let actual = payload.kind();
        match state.kind {
            Some(expected) if expected != actual => {
                return Err(RealtimeError::InvalidPayloadKind {
                    channel: self.name.clone(),
                    expected,
                    actual,
                });
            }
            Some(_) => {}
            None => {
                debug!(channel = %self.name, kind = actual, "channel kind pinned by first publish");
                state.kind = Some(actual);
            }
        }

        let mut delivered = 0;
        state.subscribers.retain(|subscriber| {
            if let Some(cap) = cap {
                if subscriber.shared.queued() >= cap {
                    warn!(
                        channel = %self.name,
                        subscription_id = %subscriber.id,
                        cap,
                        "subscription queue full, closing with backpressure"
                    );
                    subscriber.shared.fail(RealtimeError::Backpressure {
                        channel: self.name.clone(),
                        subscription: subscriber.id,
                        cap,
                    });
                    return false;
                }
            }

            subscriber.shared.enqueued();
            match subscriber.sender.send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(
                        channel = %self.name,
                        subscription_id = %subscriber.id,
                        "consumer gone, pruning subscription"
                    );
                    false
                }
            }
        });

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::{FutureExt, StreamExt};
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Link(u32),
        Vote(u32),
    }

    impl Payload for TestEvent {
        fn kind(&self) -> &'static str {
            match self {
                TestEvent::Link(_) => "link",
                TestEvent::Vote(_) => "vote",
            }
        }
    }

    fn hub() -> ChannelHub<TestEvent> {
        ChannelHub::builder()
            .channel("newLink", "link")
            .channel("newVote", "vote")
            .build()
    }

    async fn next_event(sub: &mut Subscription<TestEvent>) -> Option<Result<TestEvent, RealtimeError>> {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_publish_delivers_in_order_to_every_subscriber() {
        let hub = hub();
        let mut first = hub.subscribe("newLink");
        let mut second = hub.subscribe("newLink");

        for i in 0..5 {
            assert_eq!(hub.publish("newLink", TestEvent::Link(i)).unwrap(), 2);
        }

        for sub in [&mut first, &mut second] {
            for i in 0..5 {
                assert_eq!(next_event(sub).await, Some(Ok(TestEvent::Link(i))));
            }
            assert!(sub.next().now_or_never().is_none(), "no extra events");
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let hub = hub();
        let mut early = hub.subscribe("newLink");
        hub.publish("newLink", TestEvent::Link(1)).unwrap();

        let mut late = hub.subscribe("newLink");
        hub.publish("newLink", TestEvent::Link(2)).unwrap();

        assert_eq!(next_event(&mut early).await, Some(Ok(TestEvent::Link(1))));
        assert_eq!(next_event(&mut early).await, Some(Ok(TestEvent::Link(2))));
        assert_eq!(next_event(&mut late).await, Some(Ok(TestEvent::Link(2))));
        assert!(late.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_invalid_payload_kind_rejected() {
        let hub = hub();
        let mut sub = hub.subscribe("newLink");

        let err = hub.publish("newLink", TestEvent::Vote(7)).unwrap_err();
        assert_eq!(
            err,
            RealtimeError::InvalidPayloadKind {
                channel: "newLink".to_string(),
                expected: "link",
                actual: "vote",
            }
        );
        assert!(sub.next().now_or_never().is_none(), "nothing delivered");
    }

    #[tokio::test]
    async fn test_undeclared_channel_pins_kind_on_first_publish() {
        let hub = hub();
        assert_eq!(hub.publish("misc", TestEvent::Vote(1)).unwrap(), 0);
        assert_matches!(
            hub.publish("misc", TestEvent::Link(1)),
            Err(RealtimeError::InvalidPayloadKind { expected: "vote", .. })
        );
        assert_eq!(hub.channel_names(), vec!["misc".to_string()]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = hub();
        let mut sub = hub.subscribe("newVote");
        let mut other = hub.subscribe("newVote");

        assert!(hub.unsubscribe(&sub));
        assert!(!hub.unsubscribe(&sub));
        assert!(!sub.cancel());

        assert_eq!(hub.publish("newVote", TestEvent::Vote(1)).unwrap(), 1);
        assert_eq!(next_event(&mut sub).await, None);
        assert_eq!(next_event(&mut other).await, Some(Ok(TestEvent::Vote(1))));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiting_consumer() {
        let hub = Arc::new(hub());
        let mut sub = hub.subscribe("newLink");
        let id = sub.id();

        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(hub.channel("newLink").remove(id));
        assert_eq!(hub.subscriber_count("newLink"), 0);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer was not woken")
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_backpressure_closes_only_slow_subscription() {
        let hub: ChannelHub<TestEvent> = ChannelHub::builder()
            .channel("newLink", "link")
            .queue_cap(Some(2))
            .build();
        let mut slow = hub.subscribe("newLink");
        let mut fast = hub.subscribe("newLink");

        hub.publish("newLink", TestEvent::Link(1)).unwrap();
        assert_eq!(next_event(&mut fast).await, Some(Ok(TestEvent::Link(1))));
        hub.publish("newLink", TestEvent::Link(2)).unwrap();
        assert_eq!(next_event(&mut fast).await, Some(Ok(TestEvent::Link(2))));
        assert_eq!(hub.publish("newLink", TestEvent::Link(3)).unwrap(), 1);
        assert_eq!(next_event(&mut fast).await, Some(Ok(TestEvent::Link(3))));

        assert_eq!(next_event(&mut slow).await, Some(Ok(TestEvent::Link(1))));
        assert_eq!(next_event(&mut slow).await, Some(Ok(TestEvent::Link(2))));
        assert_matches!(
            next_event(&mut slow).await,
            Some(Err(RealtimeError::Backpressure { cap: 2, .. }))
        );
        assert_eq!(next_event(&mut slow).await, None);
        assert_eq!(hub.subscriber_count("newLink"), 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters() {
        let hub = hub();
        let sub = hub.subscribe("newLink");
        assert_eq!(hub.subscriber_count("newLink"), 1);

        drop(sub);
        assert_eq!(hub.subscriber_count("newLink"), 0);
        assert_eq!(hub.publish("newLink", TestEvent::Link(1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_publishers_keep_one_order_per_subscriber() {
        let hub = Arc::new(hub());
        let mut first = hub.subscribe("newLink");
        let mut second = hub.subscribe("newLink");

        let publishers: Vec<_> = (0..2u32)
            .map(|p| {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    for i in 0..50 {
                        hub.publish("newLink", TestEvent::Link(p * 1000 + i)).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.await.unwrap();
        }

        let mut seen_first = Vec::new();
        let mut seen_second = Vec::new();
        for _ in 0..100 {
            seen_first.push(next_event(&mut first).await.unwrap().unwrap());
            seen_second.push(next_event(&mut second).await.unwrap().unwrap());
        }
        assert_eq!(seen_first, seen_second);

        for p in 0..2u32 {
            let from_publisher: Vec<u32> = seen_first
                .iter()
                .filter_map(|e| match e {
                    TestEvent::Link(n) if n / 1000 == p => Some(*n),
                    _ => None,
                })
                .collect();
            let expected: Vec<u32> = (0..50).map(|i| p * 1000 + i).collect();
            assert_eq!(from_publisher, expected);
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_ends_streams() {
        let hub = hub();
        let mut sub = hub.subscribe("newLink");
        hub.publish("newLink", TestEvent::Link(1)).unwrap();

        hub.shutdown();
        assert_eq!(hub.publish("newLink", TestEvent::Link(2)).unwrap(), 0);

        assert_eq!(next_event(&mut sub).await, Some(Ok(TestEvent::Link(1))));
        assert_eq!(next_event(&mut sub).await, None);

        let mut after = hub.subscribe("newLink");
        assert_eq!(next_event(&mut after).await, None);
    }
}
