//! User-facing timer and ticker handles.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_channel::Channel;

use crate::now;
use crate::service::{self, AtomicStatus, Shared, Status, TimerRecord, TimerService};

/// State shared by [`Timer`] and [`Ticker`]: a record, the service it
/// schedules on, and the channel its fires land in.
struct Inner {
    service: Arc<Shared>,
    record: Arc<TimerRecord>,
    channel: Channel<Instant>,
    /// Delay until the first fire (the period, for a ticker).
    delay: Duration,
}

impl Inner {
    fn new(service: &TimerService, delay: Duration, period: Duration) -> Self {
        let channel = Channel::new(1);

        // The callbacks capture non-owning handles and upgrade only for
        // the duration of a call, so a record still sitting in the heap
        // does not keep the channel alive past its handle.
        let fire_target = channel.downgrade();
        let end_target = channel.downgrade();

        let record = Arc::new(TimerRecord {
            period,
            status: AtomicStatus::new(Status::Fresh),
            fire: Box::new(move || {
                if let Some(channel) = fire_target.upgrade() {
                    // Non-blocking: the poller must never wait on a slow
                    // consumer. A full channel drops the tick.
                    let _ = channel.try_push(now());
                }
            }),
            end: Box::new(move || {
                if let Some(channel) = end_target.upgrade() {
                    channel.close();
                }
            }),
        });

        Self {
            service: Arc::clone(service.shared()),
            record,
            channel,
            delay,
        }
    }

    fn start(&self) {
        if self.record.status.load() != Status::Fresh {
            panic!("cannot start a timer that was already started or stopped");
        }
        self.service
            .add(Arc::clone(&self.record), now() + self.delay);
    }

    fn stop(&self) -> bool {
        let stopped = service::stop(&self.record);
        if stopped {
            // The record will never fire again; the closed channel is the
            // termination signal to consumers.
            self.channel.close();
        }
        stopped
    }

    fn is_stopped(&self) -> bool {
        matches!(self.record.status.load(), Status::Deleted | Status::Removed)
    }
}

/// A one-shot timer.
///
/// After [`start`](Timer::start), the timer fires once, `delay` after the
/// start call: the fire time point is pushed into the timer's channel and
/// the channel is closed. [`stop`](Timer::stop) before the fire cancels
/// it and closes the channel instead.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use strand_timer::Timer;
///
/// let timer = Timer::new(Duration::from_millis(10));
/// timer.start();
///
/// let ch = timer.channel();
/// assert!(ch.pop().is_ok());  // the fire
/// assert!(ch.pop().is_err()); // closed afterwards
/// ```
pub struct Timer {
    inner: Inner,
}

impl Timer {
    /// Creates a one-shot timer on the process-wide default service.
    ///
    /// The timer does not arm until [`start`](Self::start) is called.
    pub fn new(delay: Duration) -> Self {
        Self::with_service(service::global(), delay)
    }

    /// Creates a one-shot timer on an explicit service.
    pub fn with_service(service: &TimerService, delay: Duration) -> Self {
        Self {
            inner: Inner::new(service, delay, Duration::ZERO),
        }
    }

    /// Arms the timer: it fires once, `delay` from now.
    ///
    /// # Panics
    ///
    /// Panics if the timer was already started or stopped.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Stops the timer and closes its channel.
    ///
    /// Returns `true` if this call stopped it; `false` if the timer had
    /// already fired or been stopped (in which case the channel is
    /// already closed and nothing further happens).
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    /// Returns a handle to the channel the fire is delivered on.
    pub fn channel(&self) -> Channel<Instant> {
        self.inner.channel.clone()
    }

    /// Returns `true` once the timer has fired or been stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("delay", &self.inner.delay)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// A repeating ticker.
///
/// After [`start`](Ticker::start), the ticker fires every `period`,
/// pushing each fire's time point into its channel non-blockingly: ticks
/// a consumer is too slow for are dropped, never coalesced or backfilled.
/// [`stop`](Ticker::stop) disarms it and closes the channel.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use strand_timer::Ticker;
///
/// let ticker = Ticker::new(Duration::from_millis(10));
/// ticker.start();
///
/// let ch = ticker.channel();
/// let first = ch.pop().unwrap();
/// let second = ch.pop().unwrap();
/// assert!(second >= first);
///
/// assert!(ticker.stop());
/// ```
pub struct Ticker {
    inner: Inner,
}

impl Ticker {
    /// Creates a ticker on the process-wide default service.
    ///
    /// The ticker does not arm until [`start`](Self::start) is called.
    pub fn new(period: Duration) -> Self {
        Self::with_service(service::global(), period)
    }

    /// Creates a ticker on an explicit service.
    pub fn with_service(service: &TimerService, period: Duration) -> Self {
        Self {
            inner: Inner::new(service, period, period),
        }
    }

    /// Arms the ticker: the first fire is one period from now.
    ///
    /// # Panics
    ///
    /// Panics if the ticker was already started or stopped.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Stops the ticker and closes its channel.
    ///
    /// Returns `true` if this call stopped it, `false` if it was already
    /// stopped.
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    /// Returns a handle to the channel fires are delivered on.
    pub fn channel(&self) -> Channel<Instant> {
        self.inner.channel.clone()
    }

    /// Returns `true` once the ticker has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("period", &self.inner.delay)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
