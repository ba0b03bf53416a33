//! The timer heap and its poller thread.
//!
//! All pending timers of a service live in one min-heap keyed by absolute
//! fire time. The poller is the only consumer of the heap's top beyond
//! tombstone housekeeping; mutators (add, stop) flip the record's status
//! and notify the poller's condition variable.
//!
//! Status machine per record:
//!
//! ```text
//!         start              scheduled fire
//! fresh ─────────▶ waiting ─────────────▶ running
//!   │                │                      │
//!   │ stop (never    │ stop                 │ (one-shot) ─▶ removed
//!   │  started)      ▼                      │ (periodic) ─▶ waiting
//!   └─────────────▶ removed    deleted ─▶ removed (by poller)
//! ```
//!
//! Any transition outside this diagram is a racy use of timers and aborts
//! the offending thread.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

use crate::handle::{Ticker, Timer};
use crate::now;

/// Lifecycle state of a timer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Status {
    /// Created but never inserted into a heap.
    Fresh = 0,
    /// In the heap, armed.
    Waiting = 1,
    /// The poller is firing it right now.
    Running = 2,
    /// Stopped while waiting; a tombstone the poller collects.
    Deleted = 3,
    /// Terminal.
    Removed = 4,
}

impl Status {
    fn from_raw(raw: u8) -> Status {
        match raw {
            0 => Status::Fresh,
            1 => Status::Waiting,
            2 => Status::Running,
            3 => Status::Deleted,
            4 => Status::Removed,
            _ => unreachable!("invalid timer status value"),
        }
    }
}

pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> Status {
        Status::from_raw(self.0.load(Ordering::Acquire))
    }

    fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Single-step transition; `false` if the state was not `from`.
    pub(crate) fn transition(&self, from: Status, to: Status) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for AtomicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(), f)
    }
}

/// A timer in the heap. The absolute fire time lives in the heap entry,
/// not here: a periodic record is re-pushed with a fresh deadline on
/// every fire.
pub(crate) struct TimerRecord {
    /// Zero for a one-shot, the tick interval for a ticker.
    pub(crate) period: Duration,
    pub(crate) status: AtomicStatus,
    /// Invoked on every fire, outside the heap lock. Must not block.
    pub(crate) fire: Box<dyn Fn() + Send + Sync>,
    /// Invoked when a one-shot completes, outside the heap lock. Must not
    /// block.
    pub(crate) end: Box<dyn Fn() + Send + Sync>,
}

struct HeapEntry {
    when: Instant,
    /// Insertion order, breaks deadline ties.
    seq: u64,
    record: Arc<TimerRecord>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline is on
        // top, earliest insertion first among equals.
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) struct Shared {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    cv: Condvar,
    shutdown: AtomicBool,
    insert_seq: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            insert_seq: AtomicU64::new(0),
        }
    }

    /// A poisoned lock only means a callback panicked on the poller; the
    /// heap itself is still structurally sound.
    fn lock(&self) -> MutexGuard<'_, BinaryHeap<HeapEntry>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a fresh record, armed for `when`.
    ///
    /// Sweeps tombstones off the top while it holds the lock, then wakes
    /// the poller so it can re-evaluate the earliest deadline.
    ///
    /// # Panics
    ///
    /// Panics with "racy use of timers" if the record is not fresh.
    pub(crate) fn add(&self, record: Arc<TimerRecord>, when: Instant) {
        if !record.status.transition(Status::Fresh, Status::Waiting) {
            panic!("racy use of timers");
        }
        let mut heap = self.lock();
        sweep_deleted(&mut heap);
        let seq = self.insert_seq.fetch_add(1, Ordering::Relaxed);
        heap.push(HeapEntry { when, seq, record });
        drop(heap);
        self.cv.notify_one();
    }
}

fn sweep_deleted(heap: &mut BinaryHeap<HeapEntry>) {
    loop {
        match heap.peek() {
            Some(top) if top.record.status.load() == Status::Deleted => {
                if let Some(entry) = heap.pop() {
                    entry.record.status.store(Status::Removed);
                }
            }
            _ => break,
        }
    }
}

/// Stops a record, following the status machine.
///
/// Returns `true` if this call stopped the timer (it was waiting or
/// never started), `false` if it already ended. A record that is
/// currently firing is waited out with a spin.
pub(crate) fn stop(record: &TimerRecord) -> bool {
    let backoff = Backoff::new();
    loop {
        match record.status.load() {
            Status::Waiting => {
                if record.status.transition(Status::Waiting, Status::Deleted) {
                    return true;
                }
            }
            Status::Deleted | Status::Removed => return false,
            Status::Running => backoff.snooze(),
            Status::Fresh => {
                if record.status.transition(Status::Fresh, Status::Removed) {
                    return true;
                }
            }
        }
    }
}

enum Step {
    /// Heap empty: park until an add notifies.
    Park,
    /// Earliest deadline is in the future: sleep until then.
    Sleep(Duration),
    /// Tombstone on top: collect it.
    Collect,
    /// Top is due: fire it.
    Fire,
}

fn poll_loop(shared: &Shared) {
    let mut heap = shared.lock();
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        let step = match heap.peek() {
            None => Step::Park,
            Some(top) => match top.record.status.load() {
                Status::Deleted => Step::Collect,
                Status::Waiting => {
                    let current = now();
                    if top.when > current {
                        Step::Sleep(top.when - current)
                    } else {
                        Step::Fire
                    }
                }
                // The poller is the only thing that can leave a record
                // running, and fresh/removed records never sit in a heap.
                Status::Fresh | Status::Running | Status::Removed => {
                    panic!("racy use of timers")
                }
            },
        };

        match step {
            Step::Park => {
                heap = shared
                    .cv
                    .wait(heap)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Step::Sleep(duration) => {
                let (guard, _) = shared
                    .cv
                    .wait_timeout(heap, duration)
                    .unwrap_or_else(PoisonError::into_inner);
                heap = guard;
            }
            Step::Collect => {
                if let Some(entry) = heap.pop() {
                    entry.record.status.store(Status::Removed);
                }
            }
            Step::Fire => {
                if let Some(entry) = heap.pop() {
                    heap = run_timer(shared, heap, entry);
                }
            }
        }
    }
}

/// Fires one due timer, releasing the heap lock around the callbacks so
/// a callback may itself start or stop timers without deadlocking.
fn run_timer<'a>(
    shared: &'a Shared,
    mut heap: MutexGuard<'a, BinaryHeap<HeapEntry>>,
    entry: HeapEntry,
) -> MutexGuard<'a, BinaryHeap<HeapEntry>> {
    if !entry.record.status.transition(Status::Waiting, Status::Running) {
        // Stopped between the due check and the claim: the only legal
        // concurrent transition out of waiting is to deleted.
        entry.record.status.store(Status::Removed);
        return heap;
    }

    if entry.record.period > Duration::ZERO {
        // Re-arm before firing so the heap always reflects the next
        // deadline while the callback runs.
        let next = next_fire(entry.when, entry.record.period, now());
        let seq = shared.insert_seq.fetch_add(1, Ordering::Relaxed);
        heap.push(HeapEntry {
            when: next,
            seq,
            record: Arc::clone(&entry.record),
        });
        entry.record.status.store(Status::Waiting);

        drop(heap);
        (entry.record.fire)();
        shared.lock()
    } else {
        drop(heap);
        (entry.record.fire)();
        (entry.record.end)();
        let heap = shared.lock();
        entry.record.status.store(Status::Removed);
        heap
    }
}

/// The least `when + k * period` strictly after `now`, with `k >= 1`.
fn next_fire(when: Instant, period: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(when);
    let k = (elapsed.as_nanos() / period.as_nanos()).min(u32::MAX as u128 - 1) as u32 + 1;
    when + period * k
}

/// A timer service: one heap of pending timers and one poller thread.
///
/// Dropping the service shuts the poller down and joins it; timers still
/// pending at that point never fire. The process-wide default service
/// used by [`Timer::new`](crate::Timer::new) and
/// [`Ticker::new`](crate::Ticker::new) is never dropped.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use strand_timer::TimerService;
///
/// let service = TimerService::new();
/// let timer = service.timer(Duration::from_millis(10));
/// timer.start();
///
/// assert!(timer.channel().pop().is_ok());
/// ```
pub struct TimerService {
    shared: Arc<Shared>,
    poller: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Creates a service and starts its poller thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared::new());
        let poller_shared = Arc::clone(&shared);
        let poller = thread::Builder::new()
            .name("strand-timer-poller".into())
            .spawn(move || poll_loop(&poller_shared))
            .expect("failed to spawn the timer poller thread");
        Self {
            shared,
            poller: Some(poller),
        }
    }

    /// Creates a one-shot timer scheduled on this service.
    ///
    /// The timer does not arm until [`Timer::start`] is called.
    pub fn timer(&self, delay: Duration) -> Timer {
        Timer::with_service(self, delay)
    }

    /// Creates a repeating ticker scheduled on this service.
    ///
    /// The ticker does not arm until [`Ticker::start`] is called.
    pub fn ticker(&self, period: Duration) -> Ticker {
        Ticker::with_service(self, period)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.cv.notify_all();
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.shared.lock().len())
            .finish_non_exhaustive()
    }
}

/// The lazily-started process-wide service behind `Timer::new` and
/// `Ticker::new`.
pub(crate) fn global() -> &'static TimerService {
    static GLOBAL: OnceLock<TimerService> = OnceLock::new();
    GLOBAL.get_or_init(TimerService::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inert_record(period: Duration) -> Arc<TimerRecord> {
        Arc::new(TimerRecord {
            period,
            status: AtomicStatus::new(Status::Fresh),
            fire: Box::new(|| {}),
            end: Box::new(|| {}),
        })
    }

    // ========================================================================
    // Status Machine
    // ========================================================================

    #[test]
    fn stop_on_fresh_record_removes_it() {
        let record = inert_record(Duration::ZERO);

        assert!(stop(&record));
        assert_eq!(record.status.load(), Status::Removed);

        // Terminal: a second stop reports already stopped.
        assert!(!stop(&record));
    }

    #[test]
    fn stop_on_waiting_record_tombstones_it() {
        let record = inert_record(Duration::ZERO);
        record.status.store(Status::Waiting);

        assert!(stop(&record));
        assert_eq!(record.status.load(), Status::Deleted);

        assert!(!stop(&record));
    }

    #[test]
    #[should_panic(expected = "racy use of timers")]
    fn add_requires_a_fresh_record() {
        let shared = Shared::new();
        let record = inert_record(Duration::ZERO);

        shared.add(Arc::clone(&record), now());
        shared.add(record, now()); // already waiting
    }

    #[test]
    fn sweep_collects_tombstones_from_the_top() {
        let shared = Shared::new();

        let doomed = inert_record(Duration::ZERO);
        let survivor = inert_record(Duration::ZERO);

        let base = now() + Duration::from_secs(60);
        shared.add(Arc::clone(&doomed), base);
        shared.add(Arc::clone(&survivor), base + Duration::from_secs(1));

        assert!(stop(&doomed));

        // The next add sweeps the tombstone off the top.
        let third = inert_record(Duration::ZERO);
        shared.add(Arc::clone(&third), base + Duration::from_secs(2));

        assert_eq!(doomed.status.load(), Status::Removed);
        assert_eq!(survivor.status.load(), Status::Waiting);
        assert_eq!(shared.lock().len(), 2);
    }

    // ========================================================================
    // Heap Ordering
    // ========================================================================

    #[test]
    fn heap_pops_earliest_deadline_first() {
        let base = now();
        let mut heap = BinaryHeap::new();

        for (when_offset, seq) in [(30u64, 0u64), (10, 1), (20, 2)] {
            heap.push(HeapEntry {
                when: base + Duration::from_millis(when_offset),
                seq,
                record: inert_record(Duration::ZERO),
            });
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, [1, 2, 0]);
    }

    #[test]
    fn heap_breaks_deadline_ties_by_insertion_order() {
        let when = now() + Duration::from_millis(10);
        let mut heap = BinaryHeap::new();

        for seq in [2u64, 0, 1] {
            heap.push(HeapEntry {
                when,
                seq,
                record: inert_record(Duration::ZERO),
            });
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    // ========================================================================
    // Re-Arm Arithmetic
    // ========================================================================

    #[test]
    fn next_fire_is_strictly_after_now() {
        let period = Duration::from_millis(100);
        let when = now();

        // Exactly on a period boundary: skip to the next one.
        let next = next_fire(when, period, when + period);
        assert_eq!(next, when + 2 * period);

        // Mid-period: round up.
        let next = next_fire(when, period, when + Duration::from_millis(150));
        assert_eq!(next, when + 2 * period);

        // Barely late: one period out.
        let next = next_fire(when, period, when);
        assert_eq!(next, when + period);
    }

    #[test]
    fn next_fire_skips_all_missed_periods() {
        let period = Duration::from_millis(10);
        let when = now();

        // Stalled for 55 periods; the next fire is at the 56th.
        let next = next_fire(when, period, when + Duration::from_millis(553));
        assert_eq!(next, when + 56 * period);
    }
}
