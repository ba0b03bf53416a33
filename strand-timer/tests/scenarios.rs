//! End-to-end timer scenarios: tickers, stops, ordering, and select
//! integration.
//!
//! Timings use generous margins so the assertions hold on loaded
//! machines.

use std::thread;
use std::time::{Duration, Instant};

use strand_channel::select::{select, Selected};
use strand_channel::Channel;
use strand_timer::{now, Ticker, Timer, TimerService};

// ============================================================================
// One-Shot Timers
// ============================================================================

#[test]
fn timer_fires_once_then_closes() {
    let timer = Timer::new(Duration::from_millis(50));
    let armed_at = now();
    timer.start();

    let ch = timer.channel();

    let fired_at = ch.pop().expect("the fire is delivered");
    assert!(fired_at >= armed_at + Duration::from_millis(50));

    // The end action closed the channel.
    assert!(ch.pop().is_err());

    // The record is marked removed once the poller reclaims the heap
    // lock, a hair after the close is observable.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !timer.is_stopped() && Instant::now() < deadline {
        thread::yield_now();
    }
    assert!(timer.is_stopped());
}

#[test]
fn stop_before_fire_cancels_and_closes() {
    let timer = Timer::new(Duration::from_secs(60));
    timer.start();

    assert!(timer.stop());
    assert!(timer.is_stopped());

    // No fire was ever delivered; the close is the only signal.
    let start = Instant::now();
    assert!(timer.channel().pop().is_err());
    assert!(start.elapsed() < Duration::from_secs(1));

    // Terminal: a second stop reports already stopped.
    assert!(!timer.stop());
}

#[test]
fn stop_after_fire_returns_false_without_fault() {
    let timer = Timer::new(Duration::from_millis(30));
    timer.start();

    // Wait until well past the fire and the end-action close.
    thread::sleep(Duration::from_millis(200));

    assert!(!timer.stop());

    // The channel still drains the fire, then reports closed; the
    // failed stop did not close (or double-close) anything.
    let ch = timer.channel();
    assert!(ch.pop().is_ok());
    assert!(ch.pop().is_err());
}

#[test]
fn stop_without_start_closes_the_channel() {
    let timer = Timer::new(Duration::from_millis(10));

    assert!(timer.stop());
    assert!(timer.is_stopped());
    assert!(timer.channel().pop().is_err());
}

#[test]
#[should_panic(expected = "already started or stopped")]
fn start_twice_panics() {
    let timer = Timer::new(Duration::from_secs(60));
    timer.start();
    timer.start();
}

#[test]
#[should_panic(expected = "already started or stopped")]
fn start_after_stop_panics() {
    let timer = Timer::new(Duration::from_secs(60));
    timer.stop();
    timer.start();
}

// ============================================================================
// Tickers
// ============================================================================

#[test]
fn ticker_fires_repeatedly_then_closes_on_stop() {
    let ticker = Ticker::new(Duration::from_millis(100));
    ticker.start();

    let ch = ticker.channel();
    let consumer = thread::spawn(move || {
        let mut fires = Vec::new();
        while let Ok(at) = ch.pop() {
            fires.push(at);
        }
        fires
    });

    // Stop midway through the sixth period: five fires are due, give or
    // take scheduling jitter.
    thread::sleep(Duration::from_millis(550));
    assert!(ticker.stop());

    let fires = consumer.join().unwrap();
    assert!(
        (3..=6).contains(&fires.len()),
        "expected about 5 fires, got {}",
        fires.len()
    );
    assert!(
        fires.windows(2).all(|pair| pair[0] <= pair[1]),
        "fire times must be non-decreasing"
    );
}

#[test]
fn unconsumed_ticks_are_dropped_not_backfilled() {
    let ticker = Ticker::new(Duration::from_millis(40));
    ticker.start();

    // Nobody consumes for several periods: the one-slot channel holds
    // the first fire and every later push is dropped.
    thread::sleep(Duration::from_millis(300));
    assert!(ticker.stop());

    let ch = ticker.channel();
    let mut drained = 0;
    while ch.pop().is_ok() {
        drained += 1;
    }
    assert_eq!(drained, 1, "missed ticks must be dropped, not queued");
}

#[test]
fn consecutive_fires_are_about_a_period_apart() {
    let period = Duration::from_millis(100);
    let ticker = Ticker::new(period);
    ticker.start();

    let ch = ticker.channel();
    let mut fires = Vec::new();
    for _ in 0..4 {
        fires.push(ch.pop().unwrap());
    }
    ticker.stop();

    // Deadlines are exact multiples of the period; the pushed time points
    // carry poller wakeup jitter, so allow a little slack.
    let floor = period - Duration::from_millis(25);
    for pair in fires.windows(2) {
        assert!(
            pair[1] - pair[0] >= floor,
            "fires {:?} apart, expected about {:?}",
            pair[1] - pair[0],
            period
        );
    }
}

// ============================================================================
// Explicit Services
// ============================================================================

#[test]
fn fires_are_delivered_in_deadline_order() {
    let service = TimerService::new();

    let late = service.timer(Duration::from_millis(180));
    let early = service.timer(Duration::from_millis(60));
    let middle = service.timer(Duration::from_millis(120));

    late.start();
    early.start();
    middle.start();

    let first = early.channel().pop().unwrap();
    let second = middle.channel().pop().unwrap();
    let third = late.channel().pop().unwrap();

    assert!(first <= second);
    assert!(second <= third);
}

#[test]
fn dropping_a_service_joins_its_poller() {
    let service = TimerService::new();
    let ticker = service.ticker(Duration::from_millis(20));
    ticker.start();

    // Let it fire at least once, then shut down with a timer still armed.
    assert!(ticker.channel().pop().is_ok());

    let start = Instant::now();
    drop(service);
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "service drop must join the poller promptly"
    );
}

#[test]
fn timers_outlive_nothing_after_handle_drop() {
    // A record still queued in the heap holds only a weak handle to the
    // channel: dropping the timer frees the channel, and the later fire
    // becomes a no-op.
    let service = TimerService::new();
    let timer = service.timer(Duration::from_millis(50));
    timer.start();

    let weak_probe = {
        let ch = timer.channel();
        ch.downgrade()
    };

    drop(timer);
    assert!(weak_probe.upgrade().is_none());

    // The fire happens after the drop and must not crash the poller.
    thread::sleep(Duration::from_millis(150));
    let fresh = service.timer(Duration::from_millis(10));
    fresh.start();
    assert!(fresh.channel().pop().is_ok(), "poller still alive");
}

// ============================================================================
// Select Integration
// ============================================================================

#[test]
fn data_beats_a_pending_timeout_in_select() {
    let timeout = Timer::new(Duration::from_secs(10));
    timeout.start();
    let timeout_ch = timeout.channel();

    let data = Channel::<bool>::new(1);
    let producer = data.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        producer.push(true).unwrap();
    });

    let mut on_timeout = timeout_ch.pop_probe();
    let mut on_data = data.pop_probe();

    match select(&mut [&mut on_timeout, &mut on_data]) {
        Selected::Ready(1) => assert_eq!(on_data.take(), Some(true)),
        other => panic!("expected the data branch, got {other:?}"),
    }

    handle.join().unwrap();
    timeout.stop();
}

#[test]
fn timeout_wins_when_no_data_arrives() {
    let timeout = Timer::new(Duration::from_millis(60));
    timeout.start();
    let timeout_ch = timeout.channel();

    let data = Channel::<bool>::new(1);

    let mut on_timeout = timeout_ch.pop_probe();
    let mut on_data = data.pop_probe();

    match select(&mut [&mut on_timeout, &mut on_data]) {
        Selected::Ready(0) => assert!(on_timeout.take().is_some()),
        other => panic!("expected the timeout branch, got {other:?}"),
    }
}
