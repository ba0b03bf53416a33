//! A counter-based barrier for fan-out/fan-in task coordination.
//!
//! A [`WaitGroup`] tracks a set of outstanding tasks: [`add`](WaitGroup::add)
//! before spawning, [`done`](WaitGroup::done) when a task finishes, and
//! [`wait`](WaitGroup::wait) to block until the count returns to zero.
//!
//! The counter itself is atomic; the mutex exists only to guard the
//! condition-variable predicate. Waiters register themselves before
//! blocking, and the registration/count accesses form a `SeqCst`
//! store-then-load pair on each side, so a `done` that drives the count
//! to zero either sees the registered waiter and notifies, or the waiter
//! sees the zero count and never blocks. A wakeup cannot be lost:
//!
//! ```text
//! Waiter:                          Finisher:
//! ─────────────────────            ─────────────────────
//! store(waiters += 1)              store(count -= 1)  -> 0
//! [SeqCst]                         [SeqCst]
//! load(count)                      load(waiters)
//! ```
//!
//! At least one of the two loads observes the other side's store.
//!
//! Reuse after `wait` returns is not forbidden, but the intended pattern
//! is single-shot: one fan-out, one join. The standard caveat applies:
//! `add` with a positive delta must not race a `wait` that has already
//! observed zero.
//!
//! # Example
//!
//! ```
//! use std::thread;
//! use strand_waitgroup::WaitGroup;
//!
//! let wg = WaitGroup::new();
//!
//! for _ in 0..5 {
//!     wg.add(1);
//!     let wg = wg.clone();
//!     thread::spawn(move || {
//!         // ... do work ...
//!         wg.done();
//!     });
//! }
//!
//! wg.wait(); // blocks until all five are done
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

struct Inner {
    /// Net outstanding tasks. Never observably negative.
    count: AtomicIsize,
    /// Threads registered in `wait`.
    waiters: AtomicUsize,
    /// Guards the condvar predicate only; the counters live outside it.
    lock: Mutex<()>,
    cv: Condvar,
}

/// A counter with blocking [`wait`](WaitGroup::wait) and concurrent
/// [`add`](WaitGroup::add)/[`done`](WaitGroup::done).
///
/// Cloning the handle is cheap and shares the same counter.
pub struct WaitGroup {
    inner: Arc<Inner>,
}

impl WaitGroup {
    /// Creates a wait group with a zero count.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                count: AtomicIsize::new(0),
                waiters: AtomicUsize::new(0),
                lock: Mutex::new(()),
                cv: Condvar::new(),
            }),
        }
    }

    /// Adds `delta` (which may be negative) to the count.
    ///
    /// Call with a positive delta **before** spawning the task it stands
    /// for. When the count reaches zero, every registered waiter is
    /// woken.
    ///
    /// # Panics
    ///
    /// Panics with "negative WaitGroup counter" if the count drops below
    /// zero.
    pub fn add(&self, delta: isize) {
        let count = self.inner.count.fetch_add(delta, Ordering::SeqCst) + delta;
        if count < 0 {
            panic!("negative WaitGroup counter");
        }
        if count == 0 && self.inner.waiters.load(Ordering::SeqCst) != 0 {
            // Taking the lock orders this notify after any waiter that
            // passed its count check but has not yet parked.
            let _guard = self
                .inner
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.cv.notify_all();
        }
    }

    /// Marks one task as finished. Equivalent to `add(-1)`.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Blocks until the count is zero.
    ///
    /// Returns immediately if it already is. Otherwise the caller is
    /// registered as a waiter and parks on the condition variable until
    /// a [`done`](Self::done) drives the count to zero.
    pub fn wait(&self) {
        if self.inner.count.load(Ordering::SeqCst) == 0 {
            return;
        }

        // Register before re-checking: pairs with the count/waiters
        // accesses in `add`.
        self.inner.waiters.fetch_add(1, Ordering::SeqCst);

        let mut guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while self.inner.count.load(Ordering::SeqCst) != 0 {
            guard = self
                .inner
                .cv
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(guard);

        self.inner.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns the current count.
    ///
    /// Only a snapshot: by the time the caller looks at it, concurrent
    /// `add`/`done` calls may have moved it.
    pub fn count(&self) -> isize {
        self.inner.count.load(Ordering::SeqCst)
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for WaitGroup {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
