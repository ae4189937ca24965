//! Live query store: re-executes tagged queries when their data changes.
//!
//! A consumer registers a query under a tag (e.g. `"Query.feed"`) together with
//! an executor. [LiveQueryStore::register] runs the executor once and hands the
//! initial snapshot straight back; every later [invalidate](LiveQueryStore::invalidate)
//! of the tag re-runs the executor in a background task and pushes the fresh
//! result onto the registration's [LiveQuery] stream.
//!
//! ## Coalescing
//!
//! Each registration runs at most one recomputation at a time. Invalidations
//! that arrive while a run is in flight only set a dirty flag; when the run
//! finishes, exactly one more run starts if the flag is set. N invalidations
//! during a run therefore cost one extra run, not N.
//!
//! The registration is indexed before its initial run, and the initial run
//! counts as "in flight", so an invalidation racing with `register` is coalesced
//! into one recomputation that starts after the initial result is returned.
//!
//! ## Failures
//!
//! - Initial run fails: `register` returns [RealtimeError::ExecutorFailure] and
//!   nothing stays registered.
//! - `register` future dropped before the initial run finishes: the
//!   registration is released as the future is dropped.
//! - Recompute fails: the consumer receives `Err(ExecutorFailure)` on its
//!   stream; the registration stays live and can be invalidated again.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::error::RealtimeError;

/// Produces the result of a live query. Implemented for any
/// `Fn() -> impl Future<Output = anyhow::Result<R>>`.
#[async_trait]
pub trait QueryExecutor<R>: Send + Sync {
    async fn execute(&self) -> anyhow::Result<R>;
}

#[async_trait]
impl<R, F, Fut> QueryExecutor<R> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Send + 'static,
{
    async fn execute(&self) -> anyhow::Result<R> {
        (self)().await
    }
}

/// Identity of the connection that owns a set of registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-erased view of a registration so one store can hold queries with
/// different result types.
trait LiveEntry: Send + Sync {
    fn id(&self) -> RegistrationId;
    fn tag(&self) -> &str;
    fn consumer(&self) -> &ConsumerId;
    fn invalidate(self: Arc<Self>);
    fn release(&self);
}

#[derive(Debug, Default)]
struct RecomputeState {
    in_flight: bool,
    dirty: bool,
    released: bool,
}

struct Registration<R> {
    id: RegistrationId,
    tag: String,
    consumer: ConsumerId,
    executor: Box<dyn QueryExecutor<R>>,
    sender: Mutex<Option<mpsc::UnboundedSender<Result<R, RealtimeError>>>>,
    state: Mutex<RecomputeState>,
    store: Weak<StoreInner>,
}

impl<R: Send + 'static> Registration<R> {
    fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn deliver(&self, item: Result<R, RealtimeError>) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(item).is_ok(),
            None => false,
        }
    }

    /// The consumer's stream is gone without a release; unindex ourselves.
    fn abandon(&self) {
        debug!(tag = %self.tag, registration_id = %self.id, "live query consumer gone");
        match self.store.upgrade() {
            Some(store) => {
                store.release(self.id);
            }
            None => self.release(),
        }
    }

    /// End the current run. Returns `true` when an invalidation arrived during
    /// it and one more run must follow.
    fn finish_run(&self) -> bool {
        let mut state = self.state.lock();
        if state.dirty && !state.released {
            state.dirty = false;
            true
        } else {
            state.in_flight = false;
            false
        }
    }

    fn spawn_recompute(self: Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.recompute());
            }
            Err(_) => {
                warn!(
                    tag = %self.tag,
                    registration_id = %self.id,
                    "no async runtime available, recompute skipped"
                );
                self.state.lock().in_flight = false;
            }
        }
    }

    async fn recompute(self: Arc<Self>) {
        loop {
            let result = self.executor.execute().await;
            if self.is_released() {
                trace!(registration_id = %self.id, "registration released during recompute");
                return;
            }

            let delivered = match result {
                Ok(value) => self.deliver(Ok(value)),
                Err(error) => {
                    warn!(
                        tag = %self.tag,
                        registration_id = %self.id,
                        consumer_id = %self.consumer,
                        error = %format!("{error:#}"),
                        "live query recompute failed"
                    );
                    self.deliver(Err(RealtimeError::executor_failure(&self.tag, &error)))
                }
            };
            if !delivered {
                self.abandon();
                return;
            }
            trace!(tag = %self.tag, registration_id = %self.id, "live query result pushed");

            if !self.finish_run() {
                return;
            }
        }
    }
}

impl<R: Send + 'static> LiveEntry for Registration<R> {
    fn id(&self) -> RegistrationId {
        self.id
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    fn invalidate(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            if state.in_flight {
                state.dirty = true;
                trace!(tag = %self.tag, registration_id = %self.id, "invalidation coalesced");
                return;
            }
            state.in_flight = true;
        }
        self.spawn_recompute();
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.released = true;
            state.dirty = false;
        }
        // Dropping the sender ends the consumer's stream.
        self.sender.lock().take();
    }
}

#[derive(Default)]
struct Registry {
    entries: HashMap<RegistrationId, Arc<dyn LiveEntry>>,
    by_tag: HashMap<String, Vec<RegistrationId>>,
}

impl Registry {
    fn insert(&mut self, entry: Arc<dyn LiveEntry>) {
        self.by_tag
            .entry(entry.tag().to_string())
            .or_default()
            .push(entry.id());
        self.entries.insert(entry.id(), entry);
    }

    fn remove(&mut self, id: RegistrationId) -> Option<Arc<dyn LiveEntry>> {
        let entry = self.entries.remove(&id)?;
        if let Some(ids) = self.by_tag.get_mut(entry.tag()) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_tag.remove(entry.tag());
            }
        }
        Some(entry)
    }
}

/// Releases a registration whose initial run did not complete, either
/// because it failed or because the `register` future was dropped.
struct InitialRunGuard<'a> {
    store: &'a StoreInner,
    id: RegistrationId,
    armed: bool,
}

impl InitialRunGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InitialRunGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.store.release(self.id) {
            debug!(registration_id = %self.id, "unfinished live query registration released");
        }
    }
}

#[derive(Default)]
struct StoreInner {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl StoreInner {
    fn release(&self, id: RegistrationId) -> bool {
        let entry = self.registry.write().remove(id);
        match entry {
            Some(entry) => {
                entry.release();
                debug!(tag = %entry.tag(), registration_id = %id, "live query released");
                true
            }
            None => false,
        }
    }
}

/// Process-wide live query store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct LiveQueryStore {
    inner: Arc<StoreInner>,
}

impl LiveQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live query and return its initial result plus the stream of
    /// later results.
    pub async fn register<R, E>(
        &self,
        tag: &str,
        executor: E,
        consumer: ConsumerId,
    ) -> Result<(R, LiveQuery<R>), RealtimeError>
    where
        R: Send + 'static,
        E: QueryExecutor<R> + 'static,
    {
        let id = RegistrationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let registration = Arc::new(Registration {
            id,
            tag: tag.to_string(),
            consumer,
            executor: Box::new(executor),
            sender: Mutex::new(Some(sender)),
            state: Mutex::new(RecomputeState {
                in_flight: true,
                ..Default::default()
            }),
            store: Arc::downgrade(&self.inner),
        });

        if self.inner.shut_down.load(Ordering::Acquire) {
            debug!(tag, "live query store is shut down, registration starts released");
            registration.release();
        } else {
            let entry: Arc<dyn LiveEntry> = registration.clone();
            self.inner.registry.write().insert(entry);
        }

        let guard = InitialRunGuard {
            store: &self.inner,
            id,
            armed: true,
        };

        let initial = match registration.executor.execute().await {
            Ok(initial) => initial,
            Err(error) => {
                drop(guard);
                warn!(tag, error = %format!("{error:#}"), "live query initial run failed");
                return Err(RealtimeError::executor_failure(tag, &error));
            }
        };

        guard.disarm();
        if registration.finish_run() {
            registration.clone().spawn_recompute();
        }

        debug!(
            tag,
            registration_id = %id,
            consumer_id = %registration.consumer,
            "live query registered"
        );

        Ok((
            initial,
            LiveQuery {
                id,
                tag: tag.to_string(),
                receiver,
                store: Arc::downgrade(&self.inner),
            },
        ))
    }

    /// Mark every registration for `tag` stale and schedule recomputation.
    /// Returns the number of registrations affected.
    pub fn invalidate(&self, tag: &str) -> usize {
        let entries: Vec<Arc<dyn LiveEntry>> = {
            let registry = self.inner.registry.read();
            registry
                .by_tag
                .get(tag)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| registry.entries.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let affected = entries.len();
        for entry in entries {
            entry.invalidate();
        }
        debug!(tag, registrations = affected, "live query tag invalidated");
        affected
    }

    /// Stop recomputation and delivery for one registration. Idempotent;
    /// returns `false` if it was already released.
    pub fn release(&self, id: RegistrationId) -> bool {
        self.inner.release(id)
    }

    /// Release every registration owned by `consumer` (connection teardown).
    pub fn release_consumer(&self, consumer: &ConsumerId) -> usize {
        let removed: Vec<Arc<dyn LiveEntry>> = {
            let mut registry = self.inner.registry.write();
            let ids: Vec<RegistrationId> = registry
                .entries
                .values()
                .filter(|entry| entry.consumer() == consumer)
                .map(|entry| entry.id())
                .collect();
            ids.into_iter().filter_map(|id| registry.remove(id)).collect()
        };

        for entry in &removed {
            entry.release();
        }
        if !removed.is_empty() {
            debug!(consumer_id = %consumer, released = removed.len(), "consumer live queries released");
        }
        removed.len()
    }

    /// Number of live registrations across all tags.
    pub fn registration_count(&self) -> usize {
        self.inner.registry.read().entries.len()
    }

    /// Number of live registrations for `tag`.
    pub fn tag_count(&self, tag: &str) -> usize {
        self.inner
            .registry
            .read()
            .by_tag
            .get(tag)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Release everything; later registrations start released.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let entries: Vec<Arc<dyn LiveEntry>> = {
            let mut registry = self.inner.registry.write();
            registry.by_tag.clear();
            registry.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.release();
        }
        info!(registrations = entries.len(), "Live query store shut down");
    }
}

/// Stream of recomputed results for one registration.
///
/// Yields `Ok(result)` per successful recompute and `Err(ExecutorFailure)` per
/// failed one; ends once the registration is released. Dropping it releases
/// the registration.
pub struct LiveQuery<R> {
    id: RegistrationId,
    tag: String,
    receiver: mpsc::UnboundedReceiver<Result<R, RealtimeError>>,
    store: Weak<StoreInner>,
}

impl<R> LiveQuery<R> {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl<R> fmt::Debug for LiveQuery<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .finish()
    }
}

impl<R> Unpin for LiveQuery<R> {}

impl<R> Stream for LiveQuery<R> {
    type Item = Result<R, RealtimeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<R> Drop for LiveQuery<R> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.release(self.id);
        }
    }
}
