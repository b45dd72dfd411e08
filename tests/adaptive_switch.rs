//! Seed scenario: an adaptive queue starts routed through its mutex backend
//! under light load, ramps up under concurrent producers/consumers until it
//! switches to the lock-free backend, and loses no job across the migration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use jobcore::sync::{AdaptiveQueue, AdaptiveQueueConfig, QueueMode, SwitchPolicy};
use jobcore::FnJob;

#[test]
fn ramps_to_lock_free_under_load_with_no_job_loss() {
    let queue = Arc::new(AdaptiveQueue::new(AdaptiveQueueConfig {
        policy: SwitchPolicy::Adaptive {
            low_watermark: 4,
            high_watermark: 32,
        },
        hazard_capacity: 64,
    }));
    assert_eq!(queue.mode(), QueueMode::Mutex);

    const PRODUCERS: usize = 8;
    const CONSUMERS: usize = 8;
    const PER_PRODUCER: usize = 500;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let executed = Arc::new(AtomicUsize::new(0));
    let switched = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = queue.clone();
            let switched = switched.clone();
            thread::spawn(move || {
                for _ in 0..PER_PRODUCER {
                    queue
                        .enqueue(Box::new(FnJob::new("work", || Ok(()))))
                        .unwrap();
                    if queue.mode() == QueueMode::LockFree {
                        switched.store(true, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = queue.clone();
            let executed = executed.clone();
            thread::spawn(move || loop {
                match queue.try_dequeue() {
                    Ok(mut job) => {
                        job.run().unwrap();
                        executed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => {
                        if executed.load(Ordering::SeqCst) >= TOTAL {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    for c in consumers {
        c.join().unwrap();
    }

    assert_eq!(executed.load(Ordering::SeqCst), TOTAL);
    assert!(
        switched.load(Ordering::SeqCst),
        "queue never ramped into lock-free mode under this load"
    );
    // Drained to zero either way, but an accurate read should agree.
    assert_eq!(queue.with_accurate_size(|q| q.size()), 0);
}
