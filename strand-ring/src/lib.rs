//! A bounded lock-free MPMC ring buffer with disposal.
//!
//! `strand-ring` provides [`RingBuffer`], a fixed-capacity queue that any
//! number of producers and consumers may share. Coordination is entirely
//! lock-free: each slot carries a sequence number that encodes whether the
//! slot is writable or readable for a given ticket, so producers and
//! consumers make progress without sharing a lock.
//!
//! # Slot Protocol
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ enqueue_pos (cache-line padded) - producer tickets    │
//! ├───────────────────────────────────────────────────────┤
//! │ dequeue_pos (cache-line padded) - consumer tickets    │
//! ├───────────────────────────────────────────────────────┤
//! │ Slot[0]: { sequence, value }                          │
//! │ Slot[1]: { sequence, value }                          │
//! │ ...                                                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! For a ticket `p` addressing slot `p & mask`:
//!
//! - `sequence == p`: the slot is empty and writable for ticket `p`
//! - `sequence == p + 1`: the slot holds data readable for ticket `p`
//! - `sequence == p + capacity`: the slot was recycled, writable next lap
//!
//! Sequence stores are release operations and loads are acquires, so the
//! value write always happens-before the publishing store. Per-slot
//! sequencing also rules out ABA: a stale ticket can never observe a
//! matching sequence.
//!
//! # Waiting Discipline
//!
//! There are no condition variables anywhere in this crate. A producer
//! whose target slot is still occupied busy-waits for the consumer to
//! recycle it; a consumer spins until data arrives, a caller-supplied
//! timeout expires, or the buffer is disposed. [`RingBuffer::dispose`]
//! terminates all in-flight and future operations promptly.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use strand_ring::RingBuffer;
//!
//! let ring = RingBuffer::new(6);
//! assert_eq!(ring.capacity(), 8); // rounded up to a power of two
//!
//! assert!(ring.put(1));
//! assert!(ring.put(2));
//! assert_eq!(ring.get(Duration::from_millis(10)), Some(1));
//! assert_eq!(ring.get(Duration::from_millis(10)), Some(2));
//!
//! // Nothing buffered: a bounded wait times out.
//! assert_eq!(ring.get(Duration::from_millis(10)), None);
//!
//! ring.dispose();
//! assert!(!ring.put(3));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};

/// A slot in the sequenced ring.
///
/// The sequence number tells a ticket holder what state the slot is in;
/// see the crate docs for the full protocol.
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Inner<T> {
    /// Producer claim position. Producers CAS on this to reserve a ticket.
    enqueue_pos: CachePadded<AtomicUsize>,
    /// Consumer claim position.
    dequeue_pos: CachePadded<AtomicUsize>,

    slots: Box<[Slot<T>]>,
    mask: usize,

    /// One-way flag; checked by every operation on every retry.
    disposed: AtomicBool,
}

// Safety: slots are only accessed by the ticket holder that claimed them
// via CAS, and the sequence protocol publishes values with release/acquire.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

/// A bounded lock-free MPMC queue with disposal.
///
/// Cloning the handle is cheap and shares the same buffer. The buffer is
/// freed when the last handle drops; any values still buffered at that
/// point are dropped in place.
///
/// # Example
///
/// ```
/// use std::thread;
/// use std::time::Duration;
/// use strand_ring::RingBuffer;
///
/// let ring = RingBuffer::new(8);
/// let producer = ring.clone();
///
/// let handle = thread::spawn(move || {
///     for i in 0..100u64 {
///         assert!(producer.put(i));
///     }
/// });
///
/// let mut received = 0;
/// while received < 100 {
///     if ring.get(Duration::from_millis(100)).is_some() {
///         received += 1;
///     }
/// }
///
/// handle.join().unwrap();
/// ```
pub struct RingBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> RingBuffer<T> {
    /// Creates a ring buffer with at least the requested capacity.
    ///
    /// The actual capacity is the requested size rounded up to the next
    /// power of two (minimum 2), so that indexing is a mask instead of a
    /// modulo.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    ///
    /// # Example
    ///
    /// ```
    /// use strand_ring::RingBuffer;
    ///
    /// let ring = RingBuffer::<u64>::new(6);
    /// assert_eq!(ring.capacity(), 8);
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let capacity = capacity.next_power_of_two().max(2);

        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        Self {
            inner: Arc::new(Inner {
                enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
                dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
                slots: slots.into_boxed_slice(),
                mask: capacity - 1,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueues a value, busy-waiting for space if the buffer is full.
    ///
    /// Returns `false` if the buffer was disposed before the value could
    /// be enqueued; the value is dropped in that case. This operation
    /// takes no lock and never touches a condition variable: when the
    /// buffer is full it spins until a consumer recycles the target slot.
    ///
    /// # Example
    ///
    /// ```
    /// use strand_ring::RingBuffer;
    ///
    /// let ring = RingBuffer::new(4);
    /// assert!(ring.put("hello"));
    ///
    /// ring.dispose();
    /// assert!(!ring.put("dropped"));
    /// ```
    pub fn put(&self, value: T) -> bool {
        let inner = &*self.inner;
        let backoff = Backoff::new();
        let mut pos = inner.enqueue_pos.load(Ordering::Relaxed);

        loop {
            if inner.disposed.load(Ordering::Relaxed) {
                return false;
            }

            let slot = &inner.slots[pos & inner.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // Slot is writable for this ticket; try to claim it.
                match inner.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            slot.value.get().cast::<T>().write(value);
                        }
                        slot.sequence
                            .store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff > 0 {
                // Another producer already claimed this ticket.
                pos = inner.enqueue_pos.load(Ordering::Relaxed);
            } else {
                // The slot still holds the previous lap: full at this
                // ticket. Wait for a consumer to recycle it. Sequences
                // can lag by at most one lap; anything further back means
                // the protocol was broken.
                debug_assert!(
                    diff >= -(self.capacity() as isize),
                    "put on a ring buffer slot in compromised state"
                );
                pos = inner.enqueue_pos.load(Ordering::Relaxed);
                backoff.snooze();
            }
        }
    }

    /// Dequeues a value, spinning for up to `timeout`.
    ///
    /// A `timeout` of [`Duration::ZERO`] means no timeout: spin until a
    /// value arrives or the buffer is disposed. Otherwise the timeout is
    /// measured from entry and `None` is returned once it elapses.
    /// Disposal also returns `None`, promptly, even mid-wait.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use strand_ring::RingBuffer;
    ///
    /// let ring = RingBuffer::new(4);
    /// ring.put(7);
    ///
    /// assert_eq!(ring.get(Duration::from_millis(10)), Some(7));
    /// assert_eq!(ring.get(Duration::from_millis(10)), None); // timed out
    /// ```
    pub fn get(&self, timeout: Duration) -> Option<T> {
        let inner = &*self.inner;
        let backoff = Backoff::new();
        let start = Instant::now();
        let mut pos = inner.dequeue_pos.load(Ordering::Relaxed);

        loop {
            if inner.disposed.load(Ordering::Relaxed) {
                return None;
            }

            let slot = &inner.slots[pos & inner.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let expected = pos.wrapping_add(1);
            let diff = seq.wrapping_sub(expected) as isize;

            if diff == 0 {
                // Slot is readable for this ticket; try to claim it.
                match inner.dequeue_pos.compare_exchange_weak(
                    pos,
                    expected,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { slot.value.get().cast::<T>().read() };
                        // Recycle the slot for the next lap.
                        slot.sequence.store(
                            pos.wrapping_add(inner.slots.len()),
                            Ordering::Release,
                        );
                        return Some(value);
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff > 0 {
                // Another consumer already claimed this ticket.
                pos = inner.dequeue_pos.load(Ordering::Relaxed);
            } else {
                // Empty at this ticket.
                debug_assert!(
                    diff >= -(self.capacity() as isize),
                    "get on a ring buffer slot in compromised state"
                );
                pos = inner.dequeue_pos.load(Ordering::Relaxed);
                backoff.snooze();
            }

            if !timeout.is_zero() && start.elapsed() >= timeout {
                return None;
            }
        }
    }

    /// Disposes the buffer.
    ///
    /// One-way and idempotent. All in-flight and future [`put`](Self::put)
    /// and [`get`](Self::get) calls observe the flag and fail promptly.
    /// Values still buffered are discarded when the last handle drops.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Relaxed);
    }

    /// Returns `true` if [`dispose`](Self::dispose) has been called.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Relaxed)
    }

    /// Returns the number of buffered values.
    ///
    /// Computed as the difference of the two ticket counters, so a
    /// concurrent observer may see a transient overestimate (a claimed
    /// ticket counts before its value is published).
    pub fn len(&self) -> usize {
        let enqueue = self.inner.enqueue_pos.load(Ordering::Relaxed);
        let dequeue = self.inner.dequeue_pos.load(Ordering::Relaxed);
        enqueue.wrapping_sub(dequeue)
    }

    /// Returns `true` if no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the actual capacity (requested size rounded up to a power
    /// of two).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Drop values that were published but never consumed. A claimed
        // ticket whose value was not yet published holds nothing.
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        while pos != tail {
            let slot = &self.slots[pos & self.mask];
            if slot.sequence.load(Ordering::Relaxed) == pos.wrapping_add(1) {
                unsafe {
                    ptr::drop_in_place(slot.value.get().cast::<T>());
                }
            }
            pos = pos.wrapping_add(1);
        }
    }
}
