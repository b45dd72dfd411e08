//! Seed scenario: three jobs submitted to a plain mutex-guarded queue come
//! back out, and run, in the order they were submitted.

use std::sync::{Arc, Mutex};

use jobcore::sync::MutexQueue;
use jobcore::FnJob;

#[test]
fn three_jobs_run_in_submission_order() {
    let queue = MutexQueue::new();
    let trace = Arc::new(Mutex::new(Vec::new()));

    for i in 1..=3 {
        let trace = trace.clone();
        queue
            .enqueue(Box::new(FnJob::new(format!("job{i}"), move || {
                trace.lock().unwrap().push(i);
                Ok(())
            })))
            .unwrap();
    }

    for _ in 0..3 {
        let mut job = queue.dequeue().unwrap();
        job.run().unwrap();
    }

    assert_eq!(*trace.lock().unwrap(), vec![1, 2, 3]);
    assert!(queue.empty());
}
