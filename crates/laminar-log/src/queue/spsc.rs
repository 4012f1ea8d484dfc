//! # SPSC Record Queue
//!
//! Lock-free single-producer single-consumer bounded queue carrying log
//! records from one application thread to the backend worker.
//!
//! ## Design
//!
//! - Cache-line padded head/tail indices prevent false sharing
//! - Power-of-2 capacity for fast modulo via bitmask
//! - Acquire/Release memory ordering for lock-free operation
//! - Consumer side exposes an explicit peek/commit/abandon contract so the
//!   backend can inspect every queue head before deciding which one to consume
//!
//! ## Consumption contract
//!
//! ```text
//!   peek() ──► Some(Candidate) ──┬──► commit(candidate) ──► record removed, returned by value
//!          │                     └──► abandon(candidate) ──► record stays at the head
//!          └─► None (queue empty)
//! ```
//!
//! At most one [`Candidate`] may be outstanding per queue. The outstanding
//! flag doubles as the consumer claim: a second `peek` (or `pop`) while a
//! candidate is alive panics instead of handing out the same slot twice.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A wrapper that pads a value to a cache line boundary to prevent false sharing.
///
/// # Example
///
/// ```rust
/// use laminar_log::queue::CachePadded;
/// use std::sync::atomic::AtomicUsize;
///
/// let head = CachePadded::new(AtomicUsize::new(0));
/// assert_eq!(head.load(std::sync::atomic::Ordering::Relaxed), 0);
/// ```
#[repr(C, align(64))]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Creates a new cache-padded value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Consumes the wrapper and returns the inner value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Default> Default for CachePadded<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePadded")
            .field("value", &self.value)
            .finish()
    }
}

/// A lock-free single-producer single-consumer bounded queue.
///
/// # Safety
///
/// This queue is only safe when there is exactly one producer thread and
/// one consumer thread. The crate enforces the producer side through
/// [`ProducerHandle`](crate::context::ProducerHandle), which is neither
/// `Clone` nor `Sync`. On the consumer side, `peek` claims the queue until
/// its candidate is released, and a [`BackendWorker`](crate::BackendWorker)
/// refuses to start on a registry another worker is already consuming.
///
/// # Example
///
/// ```rust
/// use laminar_log::queue::SpscQueue;
///
/// let queue: SpscQueue<u64> = SpscQueue::new(8);
/// queue.push(7).unwrap();
///
/// let candidate = queue.peek().unwrap();
/// assert_eq!(*candidate, 7);
/// queue.abandon(candidate);
///
/// let candidate = queue.peek().unwrap();
/// assert_eq!(queue.commit(candidate), 7);
/// assert!(queue.is_empty());
/// ```
pub struct SpscQueue<T> {
    /// Ring buffer storage
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Head index (consumer reads from here)
    head: CachePadded<AtomicUsize>,
    /// Tail index (producer writes here)
    tail: CachePadded<AtomicUsize>,
    /// Set while a candidate is outstanding. Consumer-side only.
    peeked: AtomicBool,
    /// Capacity mask for fast modulo (capacity - 1)
    capacity_mask: usize,
}

// SAFETY: SpscQueue can be sent between threads as long as T is Send
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for SpscQueue<T> {}

// SAFETY: SpscQueue can be shared between threads (one producer, one consumer)
// as long as T is Send. The atomic operations ensure correct synchronization.
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Creates a new SPSC queue with the given capacity.
    ///
    /// The capacity is rounded up to the next power of 2. One slot is kept
    /// free to tell "full" from "empty", so the queue holds `capacity - 1`
    /// records.
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0 or would overflow when rounded to power of 2.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");

        let capacity = capacity.next_power_of_two().max(2);

        let buffer: Vec<UnsafeCell<MaybeUninit<T>>> =
            (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            peeked: AtomicBool::new(false),
            capacity_mask: capacity - 1,
        }
    }

    /// Returns the capacity of the ring (including the reserved slot).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity_mask + 1
    }

    /// Returns true if the queue is empty.
    ///
    /// Note: This is a snapshot and may change immediately after returning.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head == tail
    }

    /// Returns the current number of records in the queue.
    ///
    /// Note: This is a snapshot and may change immediately after returning.
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.capacity_mask
    }

    /// Push a record to the queue. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns the record back if the queue is full.
    ///
    /// # Safety
    ///
    /// This method must only be called by the single producer thread.
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = self.next_index(tail);

        if next_tail == self.head.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: We have exclusive write access to this slot because:
        // 1. We are the only producer
        // 2. The consumer only reads slots where head < tail
        // 3. We haven't published this slot yet (tail not updated)
        #[allow(unsafe_code)]
        unsafe {
            (*self.buffer[tail].get()).write(item);
        }

        self.tail.store(next_tail, Ordering::Release);

        Ok(())
    }

    /// Pop a record from the queue.
    ///
    /// # Panics
    ///
    /// Panics if a [`Candidate`] from this queue is outstanding.
    pub fn pop(&self) -> Option<T> {
        let candidate = self.peek()?;
        Some(self.commit(candidate))
    }

    /// Peek at the head record without removing it. Never blocks.
    ///
    /// Returns `None` if the queue is empty. The returned candidate must be
    /// handed back through [`commit`](Self::commit) or
    /// [`abandon`](Self::abandon); dropping it is equivalent to abandoning.
    ///
    /// # Panics
    ///
    /// Panics if another candidate from this queue is still outstanding.
    #[must_use = "a candidate must be committed or abandoned"]
    pub fn peek(&self) -> Option<Candidate<'_, T>> {
        let outstanding = self.peeked.swap(true, Ordering::Acquire);
        assert!(
            !outstanding,
            "only one candidate per queue may be outstanding"
        );

        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            self.peeked.store(false, Ordering::Release);
            return None;
        }

        // SAFETY: Same reasoning as a pop - the slot at head has been published
        // by the producer and only the consumer can advance past it.
        #[allow(unsafe_code)]
        let item = unsafe { (*self.buffer[head].get()).assume_init_ref() };

        Some(Candidate {
            queue: self,
            head,
            item,
        })
    }

    /// Removes the candidate's record from the queue and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the candidate was peeked from a different queue or no
    /// longer points at the head.
    pub fn commit(&self, candidate: Candidate<'_, T>) -> T {
        assert!(
            std::ptr::eq(candidate.queue, self),
            "candidate committed to a queue it was not peeked from"
        );
        let head = candidate.head;
        assert_eq!(
            head,
            self.head.load(Ordering::Relaxed),
            "stale candidate committed"
        );

        // SAFETY: The candidate proves `head` holds an initialized record that
        // the consumer has not yet released. The read moves it out and the head
        // store below makes the slot reusable, so it is never read twice.
        #[allow(unsafe_code)]
        let item = unsafe { (*self.buffer[head].get()).assume_init_read() };

        // The candidate's borrow of the slot must end before the producer
        // may reuse it.
        drop(candidate);
        self.head.store(self.next_index(head), Ordering::Release);

        item
    }

    /// Releases the candidate, leaving its record at the head of the queue.
    ///
    /// # Panics
    ///
    /// Panics if the candidate was peeked from a different queue or no
    /// longer points at the head.
    pub fn abandon(&self, candidate: Candidate<'_, T>) {
        assert!(
            std::ptr::eq(candidate.queue, self),
            "candidate abandoned to a queue it was not peeked from"
        );
        assert_eq!(
            candidate.head,
            self.head.load(Ordering::Relaxed),
            "stale candidate abandoned"
        );
        drop(candidate);
    }

    /// Calculate the next index with wrap-around.
    #[inline]
    const fn next_index(&self, index: usize) -> usize {
        (index + 1) & self.capacity_mask
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SpscQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// A peeked, not yet consumed record at the head of a [`SpscQueue`].
///
/// Move-only. Dereferences to the record.
pub struct Candidate<'a, T> {
    queue: &'a SpscQueue<T>,
    head: usize,
    item: &'a T,
}

impl<T> Candidate<'_, T> {
    /// Returns the peeked record.
    #[must_use]
    pub fn get(&self) -> &T {
        self.item
    }
}

impl<T> std::ops::Deref for Candidate<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.item
    }
}

impl<T> Drop for Candidate<'_, T> {
    fn drop(&mut self) {
        self.queue.peeked.store(false, Ordering::Release);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Candidate<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("head", &self.head)
            .field("item", self.item)
            .finish()
    }
}
