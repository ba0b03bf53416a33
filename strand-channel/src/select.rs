//! Non-blocking multiplexing over channel operations.
//!
//! A [`Probe`] is one non-blocking attempt at a specific channel
//! operation: a try-push of a held value or a try-pop into a held slot.
//! [`select`] polls an ordered set of probes and returns the caller-side
//! index of the first one that completes, [`Selected::AllClosed`] once
//! every probe reports its channel closed, or (for [`try_select`])
//! [`Selected::WouldBlock`] when nothing was ready in a single pass.
//!
//! # Fairness
//!
//! The probe order is shuffled once per call with a thread-local PRNG, so
//! that when several probes are simultaneously ready no branch can starve
//! the others. The returned index is always the caller-supplied one,
//! independent of the shuffle: callers dispatch on static branch
//! identity.
//!
//! # Example
//!
//! ```
//! use strand_channel::select::{select, Selected};
//! use strand_channel::Channel;
//!
//! let numbers: Channel<u64> = Channel::new(1);
//! let words: Channel<&str> = Channel::new(1);
//! words.push("ready").unwrap();
//!
//! let mut take_number = numbers.pop_probe();
//! let mut take_word = words.pop_probe();
//!
//! // Probes over channels of different item types mix in one select.
//! let selected = select(&mut [&mut take_number, &mut take_word]);
//! assert_eq!(selected, Selected::Ready(1));
//! assert_eq!(take_word.take(), Some("ready"));
//! ```

use std::cell::RefCell;
use std::fmt;

use crossbeam_utils::Backoff;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_core::RngCore;

use crate::{Channel, TryRecvError, TrySendError};

/// The outcome of polling a probe once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The operation completed.
    Ready,
    /// The operation could not complete yet (full or empty).
    Pending,
    /// The target channel is closed for this operation.
    Closed,
}

/// A non-blocking attempt at a single channel operation.
///
/// Implemented by [`ChannelProbe`]; the trait is the type-erasure seam
/// that lets probes over channels of different item types participate in
/// one [`select`] call.
pub trait Probe {
    /// Attempts the operation once, without blocking.
    fn probe(&mut self) -> ProbeStatus;
}

enum Op<T> {
    /// Holds the value to push until a poll accepts it.
    Push(Option<T>),
    /// Holds the value received by a ready poll until taken.
    Pop(Option<T>),
}

/// A probe for one channel operation, created by
/// [`Channel::push_probe`] or [`Channel::pop_probe`].
///
/// The probe carries its own value slot: a push probe owns the pending
/// value (recoverable with [`take`](Self::take) if the channel closed
/// first), a pop probe holds the received value until taken.
pub struct ChannelProbe<'a, T> {
    channel: &'a Channel<T>,
    op: Op<T>,
}

impl<'a, T> ChannelProbe<'a, T> {
    pub(crate) fn push(channel: &'a Channel<T>, value: T) -> Self {
        Self {
            channel,
            op: Op::Push(Some(value)),
        }
    }

    pub(crate) fn pop(channel: &'a Channel<T>) -> Self {
        Self {
            channel,
            op: Op::Pop(None),
        }
    }

    /// Removes the value currently held by the probe.
    ///
    /// For a pop probe this is the value received by the last ready poll;
    /// for a push probe it is the pending value that was never accepted.
    pub fn take(&mut self) -> Option<T> {
        match &mut self.op {
            Op::Push(slot) | Op::Pop(slot) => slot.take(),
        }
    }
}

impl<T> Probe for ChannelProbe<'_, T> {
    fn probe(&mut self) -> ProbeStatus {
        match &mut self.op {
            Op::Push(slot) => {
                let value = match slot.take() {
                    Some(value) => value,
                    // Already delivered by an earlier poll.
                    None => return ProbeStatus::Ready,
                };
                match self.channel.try_push(value) {
                    Ok(()) => ProbeStatus::Ready,
                    Err(TrySendError::Full(value)) => {
                        *slot = Some(value);
                        ProbeStatus::Pending
                    }
                    Err(TrySendError::Closed(value)) => {
                        *slot = Some(value);
                        ProbeStatus::Closed
                    }
                }
            }
            Op::Pop(slot) => {
                if slot.is_some() {
                    // A previous ready poll was never taken; do not
                    // overwrite it.
                    return ProbeStatus::Ready;
                }
                match self.channel.try_pop() {
                    Ok(value) => {
                        *slot = Some(value);
                        ProbeStatus::Ready
                    }
                    Err(TryRecvError::Empty) => ProbeStatus::Pending,
                    Err(TryRecvError::Closed) => ProbeStatus::Closed,
                }
            }
        }
    }
}

impl<T> fmt::Debug for ChannelProbe<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Push(_) => "push",
            Op::Pop(_) => "pop",
        };
        f.debug_struct("ChannelProbe")
            .field("op", &op)
            .finish_non_exhaustive()
    }
}

/// The result of a [`select`] or [`try_select`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected {
    /// The probe at this caller-supplied index completed.
    Ready(usize),
    /// Every probe reported its channel closed within one pass.
    AllClosed,
    /// No probe was ready within a single pass ([`try_select`] only).
    WouldBlock,
}

thread_local! {
    static SELECT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

/// Polls the probes until one is ready or all are closed.
///
/// The probe order is shuffled once at entry; the loop then repeats
/// passes over the shuffled order, backing off briefly between passes.
/// Returns [`Selected::Ready`] with the **caller-supplied** index of the
/// first ready probe, or [`Selected::AllClosed`] once a whole pass
/// reports only closed channels (an empty probe set counts as all
/// closed).
///
/// # Example
///
/// ```
/// use strand_channel::select::{select, Selected};
/// use strand_channel::Channel;
///
/// let a = Channel::<u64>::new(1);
/// let b = Channel::<u64>::new(1);
/// a.close();
/// b.close();
///
/// let mut pa = a.pop_probe();
/// let mut pb = b.pop_probe();
/// assert_eq!(select(&mut [&mut pa, &mut pb]), Selected::AllClosed);
/// ```
pub fn select(probes: &mut [&mut dyn Probe]) -> Selected {
    SELECT_RNG.with(|rng| run_select(probes, &mut *rng.borrow_mut(), false))
}

/// Like [`select`], but returns [`Selected::WouldBlock`] after a single
/// pass with no ready probe: the "default branch" of a select.
pub fn try_select(probes: &mut [&mut dyn Probe]) -> Selected {
    SELECT_RNG.with(|rng| run_select(probes, &mut *rng.borrow_mut(), true))
}

/// [`select`] with a caller-supplied random source, for deterministic
/// shuffling in tests.
pub fn select_with_rng<R: RngCore>(probes: &mut [&mut dyn Probe], rng: &mut R) -> Selected {
    run_select(probes, rng, false)
}

/// [`try_select`] with a caller-supplied random source.
pub fn try_select_with_rng<R: RngCore>(probes: &mut [&mut dyn Probe], rng: &mut R) -> Selected {
    run_select(probes, rng, true)
}

fn run_select(
    probes: &mut [&mut dyn Probe],
    rng: &mut dyn RngCore,
    default_after_pass: bool,
) -> Selected {
    // Shuffle the caller indices once; probes are polled in shuffled
    // order but always report the caller-supplied index.
    let mut order: Vec<usize> = (0..probes.len()).collect();
    for i in (1..order.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }

    let backoff = Backoff::new();
    loop {
        let mut closed = 0;
        for &index in &order {
            match probes[index].probe() {
                ProbeStatus::Ready => return Selected::Ready(index),
                ProbeStatus::Closed => closed += 1,
                ProbeStatus::Pending => {}
            }
        }
        if closed == probes.len() {
            return Selected::AllClosed;
        }
        if default_after_pass {
            return Selected::WouldBlock;
        }
        backoff.snooze();
    }
}
