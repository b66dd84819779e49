//! Lcore API Tests
//!
//! Launch/wait across several lcores at once, with and without pinning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use pktdist::api::rte::lcore::{LcoreHandle, LcoreSet};

/// Test: every worker lcore of a set runs its closure exactly once
#[test]
#[serial_test::serial]
fn test_launch_on_all_workers() {
    let set: LcoreSet = "0-3".parse().unwrap();
    let counter = Arc::new(AtomicU32::new(0));

    let handles: Vec<LcoreHandle> = set
        .workers()
        .map(|lcore| {
            let counter = counter.clone();
            lcore
                .launch(format!("worker-{}", lcore.id()), false, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    lcore.id() as i32
                })
                .expect("Launch failed")
        })
        .collect();

    let results: Vec<i32> = handles.into_iter().map(LcoreHandle::wait).collect();
    assert_eq!(results, vec![1, 2, 3]);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

/// Test: a pinned launch still runs when pinning is not permitted
#[test]
#[serial_test::serial]
fn test_pinned_launch() {
    let set = LcoreSet::first(1);
    let main = set.main().unwrap();
    let handle = main
        .launch("pinned", true, || {
            std::thread::current()
                .name()
                .map_or(-1, |n| if n == "pinned" { 0 } else { 1 })
        })
        .expect("Launch failed");
    assert_eq!(handle.wait(), 0);
}
