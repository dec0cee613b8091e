//! Resolution, ordering and short-circuit laws of promises and request
//! queues, exercised through the public API.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use vatflow::runtime::spawn_default;
use vatflow::sync::RequestQueue;
use vatflow::{Error, ErrorKind, Outcome, Promise};

proptest! {
    #[test]
    fn every_listener_sees_the_first_resolution(
        values in proptest::collection::vec(any::<u16>(), 1..6),
        early in 0usize..4,
    ) {
        let (promise, resolver) = Promise::<u16>::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..early {
            let sink = Arc::clone(&seen);
            promise.listen_sync(move |outcome| sink.lock().push(outcome.clone()));
        }
        let accepted: Vec<bool> = values.iter().map(|v| resolver.success(*v)).collect();
        let sink = Arc::clone(&seen);
        promise.listen_sync(move |outcome| sink.lock().push(outcome.clone()));

        prop_assert!(accepted[0]);
        prop_assert!(accepted[1..].iter().all(|accepted| !accepted));
        let seen = seen.lock();
        prop_assert_eq!(seen.len(), early + 1);
        for outcome in seen.iter() {
            prop_assert_eq!(outcome.as_result().ok(), Some(&values[0]));
        }
    }
}

#[test]
fn failure_skips_mapping() {
    init_test("failure_skips_mapping");
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let mapped = Promise::<u32>::failure(Error::protocol("boom")).map(move |v| {
        flag.store(true, Ordering::SeqCst);
        v + 1
    });
    let outcome = mapped.outcome().expect("resolved synchronously");
    let kind = match &outcome {
        Outcome::Failure(error) => Some(error.kind()),
        Outcome::Success(_) => None,
    };
    assert_with_log!(
        kind == Some(ErrorKind::Protocol),
        "same failure",
        Some(ErrorKind::Protocol),
        kind
    );
    let invoked = called.load(Ordering::SeqCst);
    assert_with_log!(!invoked, "mapper invoked", false, invoked);
    test_complete!("failure_skips_mapping");
}

#[test]
fn pending_listeners_run_in_registration_order() {
    init_test("pending_listeners_run_in_registration_order");
    let (promise, resolver) = Promise::<&'static str>::pending();
    let order = Arc::new(Mutex::new(Vec::new()));
    for id in 0..5 {
        let order = Arc::clone(&order);
        promise.listen_sync(move |_| order.lock().push(id));
    }
    resolver.success("done");
    let order = order.lock().clone();
    assert_with_log!(order == [0, 1, 2, 3, 4], "order", "[0..5]", order);
    test_complete!("pending_listeners_run_in_registration_order");
}

#[test]
fn request_queue_runs_bodies_one_at_a_time() {
    init_test("request_queue_runs_bodies_one_at_a_time");
    let (completed, overlaps) = run_test(async {
        let queue = RequestQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(Mutex::new(Vec::new()));
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let mut runs = Vec::new();
        for id in 0..8_u32 {
            let spins = rng.usize(0..4);
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            let completed = Arc::clone(&completed);
            runs.push(queue.run(move || {
                spawn_default(async move {
                    if active.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    for _ in 0..spins {
                        yield_to_vat().await;
                    }
                    completed.lock().push(id);
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            }));
        }
        for run in runs {
            run.await?;
        }
        let completed = completed.lock().clone();
        Ok((completed, overlaps.load(Ordering::SeqCst)))
    })
    .expect("queue");
    assert_with_log!(overlaps == 0, "overlapping bodies", 0, overlaps);
    assert_with_log!(
        completed == (0..8).collect::<Vec<_>>(),
        "completion order",
        "submission order",
        completed
    );
    test_complete!("request_queue_runs_bodies_one_at_a_time");
}

#[test]
fn failed_body_does_not_block_the_queue() {
    init_test("failed_body_does_not_block_the_queue");
    let second = run_test(async {
        let queue = RequestQueue::new();
        let first = queue.run(|| Promise::<u8>::failure(Error::protocol("first")));
        let second = queue.run(|| Promise::value(2_u8));
        let failed = first.await.is_err();
        assert!(failed);
        second.await
    })
    .expect("second body");
    assert_with_log!(second == 2, "second result", 2, second);
    test_complete!("failed_body_does_not_block_the_queue");
}
