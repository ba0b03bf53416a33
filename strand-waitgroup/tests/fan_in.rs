//! Fan-out/fan-in with results collected over a channel.

use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use strand_channel::Channel;
use strand_waitgroup::WaitGroup;

#[test]
fn workers_feed_a_channel_and_join() {
    const WORKERS: u64 = 5;

    let wg = WaitGroup::new();
    let results = Channel::new(10);

    for i in 0..WORKERS {
        wg.add(1);
        let wg = wg.clone();
        let results = results.clone();
        thread::spawn(move || {
            let mut rng = rand::rngs::SmallRng::seed_from_u64(i);
            thread::sleep(Duration::from_millis(rng.gen_range(10..80)));
            results.push(i).unwrap();
            wg.done();
        });
    }

    // Join the whole worker set, then close: every result was pushed
    // before its done(), so the drain below sees all of them.
    wg.wait();
    results.close();

    let mut collected = Vec::new();
    while let Ok(v) = results.pop() {
        collected.push(v);
    }

    collected.sort_unstable();
    let expected: Vec<u64> = (0..WORKERS).collect();
    assert_eq!(collected, expected);
}
