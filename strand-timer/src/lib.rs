//! One-shot timers and repeating tickers whose fires are delivered
//! through channels.
//!
//! A [`TimerService`] owns a min-heap of pending timers, keyed by
//! absolute fire time, and a single background poller thread that sleeps
//! until the earliest deadline and runs due timers. [`Timer`] (one-shot)
//! and [`Ticker`] (repeating) handles each own a
//! [`Channel<Instant>`](strand_channel::Channel): every fire pushes
//! [`now`] into the channel **non-blockingly**: the poller is never
//! stalled by a slow consumer, and a missed tick is dropped rather than
//! backfilled. When a timer ends (a one-shot fires, or any timer is
//! stopped), its channel is closed, so
//! [`pop`](strand_channel::Channel::pop) returning an error is a reliable
//! termination signal.
//!
//! Fires are delivered in fire-time order across all timers of a
//! service; ties are broken by insertion order.
//!
//! Most callers use the process-wide default service through
//! [`Timer::new`] and [`Ticker::new`]; it is started lazily on first use
//! and lives for the rest of the process. An explicitly constructed
//! [`TimerService`] owns its poller thread and joins it on drop.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use strand_timer::Timer;
//!
//! let timer = Timer::new(Duration::from_millis(20));
//! timer.start();
//!
//! let ch = timer.channel();
//! let fired_at = ch.pop().expect("one fire is delivered");
//! println!("fired at {fired_at:?}");
//!
//! // A one-shot closes its channel after firing.
//! assert!(ch.pop().is_err());
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

mod handle;
mod service;

pub use handle::{Ticker, Timer};
pub use service::TimerService;

use std::time::Instant;

/// Returns the current time point.
///
/// This is the single clock used for timer deadlines, for the poller's
/// due checks, and for the time points pushed into fire channels.
#[inline]
pub fn now() -> Instant {
    Instant::now()
}
