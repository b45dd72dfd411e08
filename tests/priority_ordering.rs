//! Seed scenario: three jobs at each of Background/Batch/RealTime, drained
//! from a single worker under a typed queue, come out in priority bands --
//! every RealTime job before any Batch job, before any Background job.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobcore::priority::Priority;
use jobcore::sync::TypedQueue;
use jobcore::{FnJob, PoolBuilder};

#[test]
fn realtime_then_batch_then_background() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // Queue every job directly, before the pool (and its single worker) is
    // started, so ordering is governed purely by priority, not by a race
    // between submission and the worker already being awake.
    let queue = Arc::new(TypedQueue::new());
    for (name, priority) in [
        ("bg0", Priority::Background),
        ("batch0", Priority::Batch),
        ("rt0", Priority::RealTime),
        ("bg1", Priority::Background),
        ("batch1", Priority::Batch),
        ("rt1", Priority::RealTime),
        ("bg2", Priority::Background),
        ("batch2", Priority::Batch),
        ("rt2", Priority::RealTime),
    ] {
        let order = order.clone();
        queue
            .enqueue(
                priority,
                Box::new(FnJob::new(name, move || {
                    order.lock().unwrap().push(name);
                    Ok(())
                })),
            )
            .unwrap();
    }

    let pool = PoolBuilder::new(queue).num_workers(1).build();
    pool.start().unwrap();
    std::thread::sleep(Duration::from_millis(150));
    pool.stop(false).unwrap();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 9);
    let band = |name: &str| -> u8 {
        if name.starts_with("rt") {
            0
        } else if name.starts_with("batch") {
            1
        } else {
            2
        }
    };
    let bands: Vec<u8> = order.iter().map(|n| band(n)).collect();
    let mut sorted = bands.clone();
    sorted.sort();
    assert_eq!(bands, sorted, "expected RealTime, then Batch, then Background");
}
