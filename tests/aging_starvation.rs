//! Seed scenario: a single Background job, submitted first, must still be
//! served within a bounded time even while a steady stream of RealTime jobs
//! keeps arriving -- the aging queue's whole reason for existing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobcore::priority::{AgingCurve, Priority};
use jobcore::sync::{AgingQueue, AgingQueueConfig};
use jobcore::FnJob;

#[test]
fn background_job_is_not_starved_by_a_realtime_stream() {
    let config = AgingQueueConfig {
        tick_interval: Duration::from_millis(5),
        boost_amount: 1,
        max_boost: 4,
        curve: AgingCurve::Linear,
        exponential_factor: 1.5,
        starvation_threshold: Duration::from_secs(10),
        reset_on_dequeue: false,
    };
    // max_boost=4, boost_amount=1/tick, tick_interval=5ms: the Background
    // job needs at most 4 ticks (20ms) of aging to climb from Background to
    // RealTime's effective priority, plus scheduling slack.
    let deadline = Duration::from_millis(
        (config.max_boost as u64) * (config.tick_interval.as_millis() as u64) + 500,
    );

    let queue = Arc::new(AgingQueue::new(config));
    let served = Arc::new(AtomicBool::new(false));
    let served_at = Arc::new(std::sync::Mutex::new(None));

    let bg_served = served.clone();
    let bg_served_at = served_at.clone();
    let start = Instant::now();
    queue
        .enqueue(
            Priority::Background,
            Box::new(FnJob::new("bg", move || {
                bg_served.store(true, Ordering::SeqCst);
                *bg_served_at.lock().unwrap() = Some(start.elapsed());
                Ok(())
            })),
        )
        .unwrap();

    let producer_queue = queue.clone();
    let producer_served = served.clone();
    let realtime_count = Arc::new(AtomicUsize::new(0));
    let producer_count = realtime_count.clone();
    let producer = std::thread::spawn(move || {
        let mut i = 0;
        while !producer_served.load(Ordering::SeqCst) && i < 5000 {
            producer_queue
                .enqueue(Priority::RealTime, Box::new(FnJob::new("rt", || Ok(()))))
                .ok();
            producer_count.fetch_add(1, Ordering::SeqCst);
            i += 1;
            std::thread::sleep(Duration::from_micros(200));
        }
    });

    let consumer_queue = queue.clone();
    let deadline_clone = deadline;
    let consumer = std::thread::spawn(move || {
        let started = Instant::now();
        loop {
            match consumer_queue.try_dequeue() {
                Ok(mut job) => {
                    job.run().unwrap();
                }
                Err(_) => {
                    if started.elapsed() > deadline_clone + Duration::from_secs(2) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
            }
            if served.load(Ordering::SeqCst) {
                break;
            }
            if started.elapsed() > deadline_clone + Duration::from_secs(2) {
                break;
            }
        }
    });

    consumer.join().unwrap();
    producer.join().unwrap();
    queue.stop_waiting();

    assert!(served.load(Ordering::SeqCst), "background job was never served");
    let elapsed = served_at.lock().unwrap().expect("background job recorded no timestamp");
    assert!(
        elapsed <= deadline + Duration::from_secs(2),
        "background job took {elapsed:?}, expected within {deadline:?} (plus slack)"
    );
}
