//! `add(N)` followed by N concurrent `done()` releases the waiter exactly
//! once, and never before the Nth `done()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strand::sync::{WaitGroup, WaitGroupError};
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{assert_with_log, test_complete, test_phase, time};

#[test]
fn waiter_released_only_after_last_done() {
    init_test_logging();
    test_phase!("waiter_released_only_after_last_done");
    let rt = test_runtime(4);
    let handle = rt.handle();
    let (seen_at_release, releases) = rt
        .block_on(async move {
            const N: usize = 32;
            let wg = WaitGroup::new();
            let finished = Arc::new(AtomicUsize::new(0));
            let releases = Arc::new(AtomicUsize::new(0));
            wg.add(N as i64).expect("add");

            let waiter = {
                let wg = wg.clone();
                let finished = Arc::clone(&finished);
                let releases = Arc::clone(&releases);
                handle.spawn(async move {
                    wg.wait().await;
                    releases.fetch_add(1, Ordering::SeqCst);
                    finished.load(Ordering::SeqCst)
                })
            };

            for i in 0..N {
                let wg = wg.clone();
                let finished = Arc::clone(&finished);
                handle.spawn(async move {
                    time::sleep(Duration::from_millis((i % 4) as u64)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    wg.done().expect("balanced done");
                });
            }
            let seen = waiter.await.expect("waiter");
            (seen, releases.load(Ordering::SeqCst))
        })
        .expect("root");
    assert_with_log!(seen_at_release == 32, "dones seen at release", 32, seen_at_release);
    assert_eq!(releases, 1);
    test_complete!("waiter_released_only_after_last_done");
}

#[test]
fn underflow_fails_fast() {
    init_test_logging();
    let wg = WaitGroup::new();
    assert_eq!(
        wg.done(),
        Err(WaitGroupError::NegativeCounter { count: 0, delta: -1 })
    );
    assert_eq!(wg.count(), 0);
}

#[test]
fn batches_can_be_reused_after_waiters_return() {
    init_test_logging();
    let rt = test_runtime(2);
    let handle = rt.handle();
    rt.block_on(async move {
        let wg = WaitGroup::new();
        for batch in 0..3 {
            wg.add(2).expect("new batch");
            for _ in 0..2 {
                let wg = wg.clone();
                handle.spawn(async move {
                    wg.done().expect("balanced");
                });
            }
            wg.wait().await;
            assert_eq!(wg.count(), 0, "batch {batch} fully released");
        }
    })
    .expect("root");
}
