//! # Producer Contexts
//!
//! Every application thread that logs owns one [`ThreadContext`]: an SPSC
//! queue plus the thread's identifier. The [`ThreadContextCollection`] is the
//! registry of all of them.
//!
//! ## Lifecycle
//!
//! ```text
//! register() ──► ProducerHandle ──push()──► ThreadContext queue ──► backend
//!                     │
//!                   drop ──► context invalidated ──► reaped once its queue is empty
//! ```
//!
//! The registry list is only locked on registration and when a
//! [`ContextCache`] picks up a new generation or reaps a drained context.
//! Pushing or consuming a record never touches it.
//!
//! Every change bumps the registry generation. Each cache remembers the
//! generation it last saw, so any number of caches observe every change.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::queue::SpscQueue;

/// Default number of slots in each producer queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16_384;

/// Per-producer state: the record queue and the thread identifier.
pub struct ThreadContext<R> {
    queue: SpscQueue<R>,
    thread_id: String,
    /// Cleared when the producer's handle is dropped
    valid: AtomicBool,
    /// Records rejected because the queue was full
    dropped: AtomicU64,
}

impl<R> ThreadContext<R> {
    /// Creates a context with a queue of `capacity` slots.
    #[must_use]
    pub fn new(thread_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            queue: SpscQueue::new(capacity),
            thread_id: thread_id.into(),
            valid: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the producer's identifier.
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns the record queue.
    #[must_use]
    pub(crate) fn queue(&self) -> &SpscQueue<R> {
        &self.queue
    }

    /// Returns false once the producer has gone away.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Returns the number of records rejected because the queue was full.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Reapable: the producer is gone and nothing is left to consume.
    fn is_reapable(&self) -> bool {
        !self.is_valid() && self.queue.is_empty()
    }
}

impl<R> std::fmt::Debug for ThreadContext<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("thread_id", &self.thread_id)
            .field("valid", &self.is_valid())
            .field("pending", &self.queue.len())
            .field("dropped", &self.dropped_records())
            .finish()
    }
}

/// Registry of producer contexts, in registration order.
pub struct ThreadContextCollection<R> {
    contexts: Mutex<Vec<Arc<ThreadContext<R>>>>,
    /// Bumped whenever the list changes or a context is invalidated
    generation: Arc<AtomicU64>,
    /// Held by the one backend consuming these queues
    consumer_attached: AtomicBool,
    queue_capacity: usize,
}

impl<R> ThreadContextCollection<R> {
    /// Creates a registry whose producer queues have `queue_capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `queue_capacity` is 0.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        assert!(queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            contexts: Mutex::new(Vec::new()),
            generation: Arc::new(AtomicU64::new(0)),
            consumer_attached: AtomicBool::new(false),
            queue_capacity,
        }
    }

    /// Returns the capacity given to new producer queues.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Registers a new producer and returns its handle.
    pub fn register(&self, thread_id: impl Into<String>) -> ProducerHandle<R> {
        let context = Arc::new(ThreadContext::new(thread_id, self.queue_capacity));
        {
            let mut contexts = self.contexts.lock();
            contexts.push(Arc::clone(&context));
            self.generation.fetch_add(1, Ordering::AcqRel);
        }

        ProducerHandle {
            context,
            generation: Arc::clone(&self.generation),
            _not_sync: PhantomData,
        }
    }

    /// Registers the calling thread, identified by its name or, for unnamed
    /// threads, its [`ThreadId`](std::thread::ThreadId).
    pub fn register_current_thread(&self) -> ProducerHandle<R> {
        let current = std::thread::current();
        let thread_id = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };
        self.register(thread_id)
    }

    /// Returns the number of registered contexts, including invalidated ones
    /// that still hold records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns true if no context is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    /// Returns the registry generation. It changes on every registration,
    /// producer drop and reap.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns true while a backend worker is consuming this registry.
    #[must_use]
    pub fn has_consumer(&self) -> bool {
        self.consumer_attached.load(Ordering::Acquire)
    }

    /// Claims the consumer side. Returns false if it is already claimed.
    pub(crate) fn attach_consumer(&self) -> bool {
        self.consumer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn detach_consumer(&self) {
        self.consumer_attached.store(false, Ordering::Release);
    }

    /// Returns the list together with the generation it is at least as new as.
    fn snapshot(&self) -> (u64, Vec<Arc<ThreadContext<R>>>) {
        // Read before locking: a change racing the clone leaves the caller
        // with an older generation, so it simply snapshots again.
        let generation = self.generation.load(Ordering::Acquire);
        let contexts = self.contexts.lock().clone();
        (generation, contexts)
    }

    /// Removes invalidated contexts whose queues are empty.
    fn reap(&self) {
        let mut contexts = self.contexts.lock();
        let before = contexts.len();
        contexts.retain(|ctx| !ctx.is_reapable());
        if contexts.len() != before {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl<R> Default for ThreadContextCollection<R> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<R> std::fmt::Debug for ThreadContextCollection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContextCollection")
            .field("len", &self.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// The producer side of one [`ThreadContext`].
///
/// `Send` but neither `Sync` nor `Clone`, so exactly one thread can push into
/// a given queue. Dropping the handle invalidates the context; records already
/// queued are still consumed.
pub struct ProducerHandle<R> {
    context: Arc<ThreadContext<R>>,
    generation: Arc<AtomicU64>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<R> ProducerHandle<R> {
    /// Enqueues a record. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns the record back if the queue is full. The rejection is counted
    /// in [`ThreadContext::dropped_records`].
    pub fn push(&self, record: R) -> Result<(), R> {
        self.context.queue.push(record).inspect_err(|_| {
            self.context.dropped.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Returns the producer's identifier.
    #[must_use]
    pub fn thread_id(&self) -> &str {
        self.context.thread_id()
    }

    /// Returns the number of records waiting to be consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.context.queue.len()
    }

    /// Returns the number of records rejected so far.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.context.dropped_records()
    }
}

impl<R> Drop for ProducerHandle<R> {
    fn drop(&mut self) {
        self.context.invalidate();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl<R> std::fmt::Debug for ProducerHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("thread_id", &self.thread_id())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// A cached, registration-ordered view of the registry.
///
/// Caches are independent: refreshing one never hides a change from another.
pub struct ContextCache<R> {
    contexts: Vec<Arc<ThreadContext<R>>>,
    /// Registry generation the cached list was taken at
    generation: u64,
    /// Some cached context belongs to a producer that has gone away
    holds_invalid: bool,
}

impl<R> ContextCache<R> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: Vec::new(),
            generation: 0,
            holds_invalid: false,
        }
    }

    /// Picks up registry changes and returns the current contexts.
    ///
    /// Invalidated contexts stay in the list until their queues are drained;
    /// the registry is locked to reap them only once one actually is empty.
    pub fn refresh(&mut self, collection: &ThreadContextCollection<R>) -> &[Arc<ThreadContext<R>>] {
        if self.holds_invalid && self.contexts.iter().any(|ctx| ctx.is_reapable()) {
            collection.reap();
        }

        if collection.generation() != self.generation {
            let (generation, contexts) = collection.snapshot();
            self.holds_invalid = contexts.iter().any(|ctx| !ctx.is_valid());
            self.contexts = contexts;
            self.generation = generation;
        }
        &self.contexts
    }

    /// Returns the cached contexts without refreshing.
    #[must_use]
    pub fn contexts(&self) -> &[Arc<ThreadContext<R>>] {
        &self.contexts
    }
}

impl<R> Default for ContextCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_preserves_order() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        let _a = collection.register("a");
        let _b = collection.register("b");
        let _c = collection.register("c");

        let mut cache = ContextCache::new();
        let ids: Vec<_> = cache
            .refresh(&collection)
            .iter()
            .map(|ctx| ctx.thread_id().to_string())
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_cache_sees_late_registration() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        let mut cache = ContextCache::new();
        assert!(cache.refresh(&collection).is_empty());

        let _a = collection.register("a");
        assert_eq!(cache.refresh(&collection).len(), 1);
        // Unchanged registry keeps the cached list
        assert_eq!(cache.refresh(&collection).len(), 1);
    }

    #[test]
    fn test_push_and_pending() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(4);
        let producer = collection.register("p");
        producer.push(1).unwrap();
        producer.push(2).unwrap();
        assert_eq!(producer.pending(), 2);
        assert_eq!(producer.thread_id(), "p");
    }

    #[test]
    fn test_full_queue_counts_drop() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(2);
        let producer = collection.register("p");
        producer.push(1).unwrap();
        assert_eq!(producer.push(2), Err(2));
        assert_eq!(producer.dropped_records(), 1);
    }

    #[test]
    fn test_dropped_producer_kept_until_drained() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        let producer = collection.register("gone");
        producer.push(5).unwrap();
        drop(producer);

        let mut cache = ContextCache::new();
        let contexts = cache.refresh(&collection);
        assert_eq!(contexts.len(), 1);
        assert!(!contexts[0].is_valid());
        assert_eq!(contexts[0].queue().pop(), Some(5));

        // Now empty and invalid: reaped on the next refresh
        assert!(cache.refresh(&collection).is_empty());
        assert!(collection.is_empty());
    }

    #[test]
    fn test_independent_caches_each_see_changes() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        let mut backend = ContextCache::new();
        let mut other = ContextCache::new();

        let _a = collection.register("a");
        assert_eq!(other.refresh(&collection).len(), 1);
        assert_eq!(backend.refresh(&collection).len(), 1);

        let _b = collection.register("b");
        assert_eq!(other.refresh(&collection).len(), 2);
        assert_eq!(backend.refresh(&collection).len(), 2);

        // A cache created late still sees everything
        let mut late = ContextCache::new();
        assert_eq!(late.refresh(&collection).len(), 2);
    }

    #[test]
    fn test_backlog_of_dropped_producer_does_not_churn_registry() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        let producer = collection.register("gone");
        for n in 0..4 {
            producer.push(n).unwrap();
        }
        drop(producer);

        let mut cache = ContextCache::new();
        let context = Arc::clone(&cache.refresh(&collection)[0]);
        let generation = collection.generation();

        for expected in 0..3 {
            assert_eq!(context.queue().pop(), Some(expected));
            assert_eq!(cache.refresh(&collection).len(), 1);
            assert_eq!(collection.generation(), generation);
        }

        assert_eq!(context.queue().pop(), Some(3));
        assert!(cache.refresh(&collection).is_empty());
        assert_eq!(collection.generation(), generation + 1);
        assert!(collection.is_empty());
    }

    #[test]
    fn test_single_consumer_claim() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        assert!(!collection.has_consumer());
        assert!(collection.attach_consumer());
        assert!(!collection.attach_consumer());
        assert!(collection.has_consumer());
        collection.detach_consumer();
        assert!(collection.attach_consumer());
    }

    #[test]
    fn test_register_current_thread_uses_name() {
        let collection: ThreadContextCollection<u64> = ThreadContextCollection::new(8);
        let handle = std::thread::Builder::new()
            .name("producer-7".to_string())
            .spawn(move || {
                let producer = collection.register_current_thread();
                producer.thread_id().to_string()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), "producer-7");
    }

    #[test]
    fn test_producer_handle_moves_across_threads() {
        let collection: Arc<ThreadContextCollection<u64>> =
            Arc::new(ThreadContextCollection::new(8));
        let producer = collection.register("moved");
        std::thread::spawn(move || {
            producer.push(9).unwrap();
        })
        .join()
        .unwrap();

        let mut cache = ContextCache::new();
        let contexts = cache.refresh(&collection);
        assert_eq!(contexts[0].queue().pop(), Some(9));
    }
}
