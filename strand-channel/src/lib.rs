//! A bounded blocking MPMC channel with close semantics.
//!
//! [`Channel`] is a fixed-capacity FIFO shared by any number of producers
//! and consumers through cheap cloneable handles. It pairs blocking
//! endpoints ([`push`](Channel::push) / [`pop`](Channel::pop)) with
//! non-blocking ones ([`try_push`](Channel::try_push) /
//! [`try_pop`](Channel::try_pop)), and adds a one-way
//! [`close`](Channel::close) signal:
//!
//! - after close, no value can be enqueued;
//! - values enqueued before close remain drainable;
//! - once closed **and** drained, `pop` reports [`RecvError`] instead of
//!   blocking: close is a reliable termination signal for consumers.
//!
//! The channel serializes on a single mutex with one condition variable
//! shared by producers and consumers; every state change uses a broadcast
//! wakeup so a notification can never land on the wrong side of a mixed
//! waiter set.
//!
//! The default capacity is 1. That is a one-slot channel, not a
//! synchronous rendezvous: a sender may return before a receiver arrives
//! as long as the slot is free.
//!
//! # Select
//!
//! The [`select`] module multiplexes non-blocking attempts over several
//! channels: each channel hands out [`probes`](Channel::pop_probe) that
//! report ready / pending / closed, and [`select::select`] polls a set of
//! them fairly until one is ready or all are closed.
//!
//! # Example
//!
//! ```
//! use std::thread;
//! use strand_channel::Channel;
//!
//! let ch = Channel::new(3);
//! let producer = ch.clone();
//!
//! let handle = thread::spawn(move || {
//!     for i in 0..5 {
//!         producer.push(i).unwrap();
//!     }
//!     producer.close();
//! });
//!
//! let mut received = Vec::new();
//! while let Ok(v) = ch.pop() {
//!     received.push(v);
//! }
//!
//! handle.join().unwrap();
//! assert_eq!(received, [0, 1, 2, 3, 4]);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod select;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use crate::select::ChannelProbe;

struct Inner<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    cv: Condvar,
}

impl<T> Shared<T> {
    /// A poisoned lock only means another handle panicked while holding
    /// it; the queue itself is still structurally sound, so we keep going.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded FIFO channel with blocking and non-blocking endpoints and a
/// one-way close signal.
///
/// Cloning the handle is cheap and shares the same queue; the queue lives
/// until the last [`Channel`] handle drops ([`WeakChannel`] handles do not
/// keep it alive).
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Channel<T> {
    /// Creates a channel with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    ///
    /// # Example
    ///
    /// ```
    /// use strand_channel::Channel;
    ///
    /// let ch = Channel::new(3);
    /// assert_eq!(ch.capacity(), 3);
    /// ch.push(1).unwrap();
    /// assert_eq!(ch.pop().unwrap(), 1);
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::with_capacity(capacity),
                    capacity,
                    closed: false,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Enqueues a value, blocking while the channel is full.
    ///
    /// Returns `Err(SendError(value))` if the channel is closed, whether
    /// observed on entry or while waiting for a free slot: close releases
    /// blocked producers.
    ///
    /// # Example
    ///
    /// ```
    /// use strand_channel::Channel;
    ///
    /// let ch = Channel::new(1);
    /// ch.push(1).unwrap();
    ///
    /// ch.close();
    /// assert_eq!(ch.push(2).unwrap_err().into_inner(), 2);
    /// ```
    pub fn push(&self, value: T) -> Result<(), SendError<T>> {
        let mut inner = self.shared.lock();
        loop {
            if inner.closed {
                return Err(SendError(value));
            }
            if inner.queue.len() < inner.capacity {
                break;
            }
            inner = self
                .shared
                .cv
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.queue.push_back(value);
        drop(inner);
        self.shared.cv.notify_all();
        Ok(())
    }

    /// Dequeues the front value, blocking while the channel is empty and
    /// open.
    ///
    /// Returns `Err(RecvError)` once the channel is closed **and**
    /// drained; values buffered before close are always delivered first.
    ///
    /// # Example
    ///
    /// ```
    /// use strand_channel::Channel;
    ///
    /// let ch = Channel::new(2);
    /// ch.push(1).unwrap();
    /// ch.close();
    ///
    /// assert_eq!(ch.pop().unwrap(), 1); // drains before reporting closed
    /// assert!(ch.pop().is_err());
    /// ```
    pub fn pop(&self) -> Result<T, RecvError> {
        let mut inner = self.shared.lock();
        loop {
            if let Some(value) = inner.queue.pop_front() {
                drop(inner);
                self.shared.cv.notify_all();
                return Ok(value);
            }
            if inner.closed {
                return Err(RecvError);
            }
            inner = self
                .shared
                .cv
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Attempts to enqueue a value without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(TrySendError::Closed(value))` if the channel is
    /// closed, `Err(TrySendError::Full(value))` if it is at capacity.
    pub fn try_push(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut inner = self.shared.lock();
        if inner.closed {
            return Err(TrySendError::Closed(value));
        }
        if inner.queue.len() == inner.capacity {
            return Err(TrySendError::Full(value));
        }
        inner.queue.push_back(value);
        drop(inner);
        self.shared.cv.notify_all();
        Ok(())
    }

    /// Attempts to dequeue the front value without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(TryRecvError::Closed)` only when the channel is closed
    /// **and** empty (the drain rule), `Err(TryRecvError::Empty)` when it
    /// is merely empty.
    pub fn try_pop(&self) -> Result<T, TryRecvError> {
        let mut inner = self.shared.lock();
        match inner.queue.pop_front() {
            Some(value) => {
                drop(inner);
                self.shared.cv.notify_all();
                Ok(value)
            }
            None if inner.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Closes the channel and releases every blocked producer and
    /// consumer.
    ///
    /// Idempotent: closing an already-closed channel has no further
    /// effect. Buffered values are never discarded; consumers drain them
    /// before observing the close.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        inner.closed = true;
        drop(inner);
        self.shared.cv.notify_all();
    }

    /// Returns `true` if [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns the number of buffered values.
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Returns `true` if no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity the channel was created with.
    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    /// Creates a non-owning handle to this channel.
    ///
    /// Useful for callbacks that must not extend the channel's lifetime,
    /// such as timer fire actions: the weak handle upgrades for the
    /// duration of the callback only.
    pub fn downgrade(&self) -> WeakChannel<T> {
        WeakChannel {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Creates a probe that attempts a non-blocking push of `value`,
    /// usable with [`select::select`].
    ///
    /// The probe holds the value until a poll accepts it; on a closed
    /// channel the value stays in the probe and can be recovered with
    /// [`ChannelProbe::take`].
    pub fn push_probe(&self, value: T) -> ChannelProbe<'_, T> {
        ChannelProbe::push(self, value)
    }

    /// Creates a probe that attempts a non-blocking pop, usable with
    /// [`select::select`].
    ///
    /// After a ready poll, the received value is held by the probe until
    /// retrieved with [`ChannelProbe::take`].
    pub fn pop_probe(&self) -> ChannelProbe<'_, T> {
        ChannelProbe::pop(self)
    }
}

impl<T> Default for Channel<T> {
    /// A one-slot channel: the "unbuffered-like" default.
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Channel")
            .field("capacity", &inner.capacity)
            .field("len", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish_non_exhaustive()
    }
}

/// A non-owning handle to a [`Channel`].
///
/// Obtained from [`Channel::downgrade`]. Does not keep the channel alive;
/// [`upgrade`](WeakChannel::upgrade) returns `None` once every strong
/// handle has dropped.
pub struct WeakChannel<T> {
    shared: Weak<Shared<T>>,
}

impl<T> WeakChannel<T> {
    /// Attempts to upgrade to a strong [`Channel`] handle.
    pub fn upgrade(&self) -> Option<Channel<T>> {
        self.shared.upgrade().map(|shared| Channel { shared })
    }
}

impl<T> Clone for WeakChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for WeakChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakChannel").finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error returned when [`Channel::push`] fails because the channel closed.
///
/// Contains the value that could not be sent, returning ownership to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pushing on a closed channel")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned when [`Channel::pop`] finds the channel closed and
/// drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "popping from a closed and empty channel")
    }
}

impl std::error::Error for RecvError {}

/// Error returned by [`Channel::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel is at capacity but still open.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// Returns `true` if this error is the `Full` variant.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns `true` if this error is the `Closed` variant.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "channel is full"),
            Self::Closed(_) => write!(f, "channel is closed"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned by [`Channel::try_pop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The channel is empty but still open.
    Empty,
    /// The channel is closed and holds no more values.
    Closed,
}

impl TryRecvError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Closed` variant.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel is empty"),
            Self::Closed => write!(f, "channel is closed and empty"),
        }
    }
}

impl std::error::Error for TryRecvError {}
