//! Seed scenario: four producers each push 1000 jobs into a lock-free MPMC
//! queue while four consumers drain concurrently; every job is accounted for
//! exactly once -- no loss, no double execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use jobcore::sync::LockFreeQueue;
use jobcore::FnJob;

#[test]
fn four_producers_four_consumers_conserve_every_job() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 1000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let queue = Arc::new(LockFreeQueue::new());
    let executed = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(PRODUCERS + 1));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = queue.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..PER_PRODUCER {
                    queue
                        .enqueue(Box::new(FnJob::new("inc", || Ok(()))))
                        .unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let executed = executed.clone();
            thread::spawn(move || {
                let mut seen = 0usize;
                loop {
                    match queue.try_dequeue() {
                        Ok(mut job) => {
                            job.run().unwrap();
                            executed.fetch_add(1, Ordering::SeqCst);
                            seen += 1;
                        }
                        Err(_) => {
                            if executed.load(Ordering::SeqCst) >= TOTAL {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
                seen
            })
        })
        .collect();

    start.wait();
    for p in producers {
        p.join().unwrap();
    }
    for c in consumers {
        c.join().unwrap();
    }

    assert_eq!(executed.load(Ordering::SeqCst), TOTAL);
    assert!(queue.approximate_empty());
}
