//! Seed scenario: 1000 slow jobs are queued on an 8-worker pool; a graceful
//! `stop` requested 50ms in lets every job that's already in flight finish,
//! and `stop` itself only returns once every worker thread has joined.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobcore::sync::TypedQueue;
use jobcore::{FnJob, PoolBuilder};

#[test]
fn graceful_stop_drains_in_flight_jobs_before_returning() {
    let pool = PoolBuilder::new(Arc::new(TypedQueue::new()))
        .num_workers(8)
        .build();
    pool.start().unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for i in 0..1000 {
        let completed = completed.clone();
        pool.enqueue(Box::new(FnJob::new(format!("slow{i}"), move || {
            std::thread::sleep(Duration::from_millis(10));
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })))
        .unwrap();
    }

    std::thread::sleep(Duration::from_millis(50));

    let stop_started = Instant::now();
    pool.stop(false).unwrap();
    let stop_took = stop_started.elapsed();

    // stop() only returned after join()-ing every worker handle, so any job
    // that was mid-run at the moment stop() was called must be reflected in
    // the completed counter already -- there is no window after stop()
    // returns where an in-flight job could still be executing.
    let finished = completed.load(Ordering::SeqCst);
    assert!(finished > 0, "no jobs completed before stop was requested");
    assert!(
        finished <= 1000,
        "completed count {finished} exceeds total submitted"
    );

    // stop(false) must have actually waited on in-flight work, not returned
    // instantly while workers were still mid-job.
    assert!(
        stop_took >= Duration::from_millis(1),
        "stop returned suspiciously fast ({stop_took:?}) for in-flight 10ms jobs"
    );

    assert!(!pool.is_running());
}
